//! Trusted-subnet admission for ingestion requests.

use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denied {
    #[error("source address required")]
    MissingAddress,
    #[error("source address {0:?} is not an IP address")]
    InvalidAddress(String),
    #[error("source address {0} is outside the trusted subnet")]
    OutsideSubnet(IpAddr),
}

/// An IP network in CIDR form, e.g. `10.0.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpSubnet {
    base: IpAddr,
    mask_bits: u8,
}

impl IpSubnet {
    /// Check if an IP address belongs to this subnet. Addresses of the
    /// other family never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.base, ip) {
            (IpAddr::V4(base), IpAddr::V4(target)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.mask_bits))
                    .unwrap_or(0);
                (u32::from(base) & mask) == (u32::from(target) & mask)
            }
            (IpAddr::V6(base), IpAddr::V6(target)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.mask_bits))
                    .unwrap_or(0);
                (u128::from(base) & mask) == (u128::from(target) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for IpSubnet {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AccessError::InvalidCidr(s.to_string());
        let (addr, bits) = s.trim().split_once('/').ok_or_else(invalid)?;
        let base: IpAddr = addr.parse().map_err(|_| invalid())?;
        let mask_bits: u8 = bits.parse().map_err(|_| invalid())?;
        let max = if base.is_ipv4() { 32 } else { 128 };
        if mask_bits > max {
            return Err(invalid());
        }
        Ok(Self { base, mask_bits })
    }
}

impl std::fmt::Display for IpSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.mask_bits)
    }
}

/// Admits everything when unconfigured; otherwise only addresses inside
/// the trusted subnet.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    subnet: Option<IpSubnet>,
}

impl AccessGuard {
    pub fn new(cidr: Option<&str>) -> Result<Self, AccessError> {
        let subnet = match cidr.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => Some(c.parse()?),
            None => None,
        };
        Ok(Self { subnet })
    }

    pub fn subnet(&self) -> Option<&IpSubnet> {
        self.subnet.as_ref()
    }

    pub fn check(&self, source: Option<&str>) -> Result<(), Denied> {
        let Some(subnet) = &self.subnet else {
            return Ok(());
        };
        let raw = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(Denied::MissingAddress)?;
        let ip: IpAddr = raw
            .parse()
            .map_err(|_| Denied::InvalidAddress(raw.to_string()))?;
        if subnet.contains(ip) {
            Ok(())
        } else {
            Err(Denied::OutsideSubnet(ip))
        }
    }
}
