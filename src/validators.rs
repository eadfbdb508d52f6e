//! Input validation for addresses that end up in ufw rules
//!
//! Blocklist lines and (by default) operator whitelist entries must be an IPv4
//! address or an IPv4 CIDR block. Port tokens are deliberately not validated
//! here: ufw accepts a wide syntax (`22`, `80/tcp`, `6000:6007/udp`, service
//! names) and is the authority on what it accepts.

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Validates a dotted-quad IPv4 address with an optional `/prefix` suffix.
///
/// Octets must be 0-255 and the prefix 0-32. Surrounding whitespace is not
/// accepted; callers trim lines before validating.
///
/// # Errors
///
/// Returns `Err` with a short reason when `input` is not an IPv4 address or CIDR.
///
/// # Examples
///
/// ```
/// use ufwsync::validators::validate_ipv4_or_cidr;
///
/// assert!(validate_ipv4_or_cidr("10.0.0.5/24").is_ok());
/// assert!(validate_ipv4_or_cidr("203.0.113.9").is_ok());
/// assert!(validate_ipv4_or_cidr("not-an-ip").is_err());
/// ```
pub fn validate_ipv4_or_cidr(input: &str) -> Result<Ipv4Network, String> {
    if input.is_empty() {
        return Err("Address is empty".to_string());
    }

    if input.chars().any(char::is_whitespace) {
        return Err("Address contains whitespace".to_string());
    }

    // Ipv4Network parsing alone would accept a bare address, which is what we want,
    // but split first so the error says which half is wrong.
    let (addr, prefix) = match input.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (input, None),
    };

    addr.parse::<Ipv4Addr>()
        .map_err(|_| format!("'{addr}' is not a dotted-quad IPv4 address"))?;

    if let Some(prefix) = prefix {
        let valid = !prefix.is_empty()
            && prefix.len() <= 2
            && prefix.chars().all(|c| c.is_ascii_digit())
            && prefix.parse::<u8>().is_ok_and(|p| p <= 32);
        if !valid {
            return Err(format!("'/{prefix}' is not a prefix length between 0 and 32"));
        }
    }

    input
        .parse::<Ipv4Network>()
        .map_err(|e| format!("Invalid IPv4 network: {e}"))
}

/// Returns `true` if `input` passes [`validate_ipv4_or_cidr`].
pub fn is_ipv4_or_cidr(input: &str) -> bool {
    validate_ipv4_or_cidr(input).is_ok()
}

/// Checks if a network is in a reserved range and returns an informational warning.
///
/// This is informational only and does not block whitelisting.
pub fn check_reserved_ip(net: Ipv4Network) -> Option<String> {
    let ip = net.ip();
    let octets = ip.octets();

    if net.prefix() == 0 {
        return Some("0.0.0.0/0 matches every address".to_string());
    }

    // RFC 1918 private ranges
    if octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
    {
        return Some("Private IP range (RFC 1918) - usually a LAN address".to_string());
    }

    if ip.is_loopback() {
        return Some("Loopback range (127.x) - ufw already allows loopback".to_string());
    }

    if ip.is_link_local() {
        return Some("Link-local range (169.254.x.x) - APIPA addresses".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_address_is_valid() {
        let net = validate_ipv4_or_cidr("203.0.113.9").unwrap();
        assert_eq!(net.prefix(), 32);
    }

    #[test]
    fn test_cidr_with_host_bits_is_valid() {
        let net = validate_ipv4_or_cidr("10.0.0.5/24").unwrap();
        assert_eq!(net.prefix(), 24);
        assert_eq!(net.ip(), Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(validate_ipv4_or_cidr("not-an-ip").is_err());
        assert!(validate_ipv4_or_cidr("").is_err());
        assert!(validate_ipv4_or_cidr("example.com").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_octets() {
        assert!(validate_ipv4_or_cidr("256.1.1.1").is_err());
        assert!(validate_ipv4_or_cidr("1.2.3").is_err());
        assert!(validate_ipv4_or_cidr("1.2.3.4.5").is_err());
    }

    #[test]
    fn test_rejects_bad_prefix() {
        assert!(validate_ipv4_or_cidr("10.0.0.0/33").is_err());
        assert!(validate_ipv4_or_cidr("10.0.0.0/").is_err());
        assert!(validate_ipv4_or_cidr("10.0.0.0/abc").is_err());
        assert!(validate_ipv4_or_cidr("10.0.0.0/+8").is_err());
        assert!(validate_ipv4_or_cidr("10.0.0.0/008").is_err());
    }

    #[test]
    fn test_rejects_ipv6() {
        assert!(validate_ipv4_or_cidr("2001:db8::1").is_err());
        assert!(validate_ipv4_or_cidr("2001:db8::/32").is_err());
    }

    #[test]
    fn test_rejects_whitespace() {
        assert!(validate_ipv4_or_cidr(" 10.0.0.1").is_err());
        assert!(validate_ipv4_or_cidr("10.0.0.1 ").is_err());
        assert!(validate_ipv4_or_cidr("10.0.0.1\r").is_err());
    }

    #[test]
    fn test_boundary_prefixes() {
        assert!(is_ipv4_or_cidr("0.0.0.0/0"));
        assert!(is_ipv4_or_cidr("255.255.255.255/32"));
    }

    #[test]
    fn test_check_reserved_ip() {
        let private: Ipv4Network = "192.168.1.0/24".parse().unwrap();
        assert!(check_reserved_ip(private).unwrap().contains("RFC 1918"));

        let loopback: Ipv4Network = "127.0.0.1".parse().unwrap();
        assert!(check_reserved_ip(loopback).unwrap().contains("Loopback"));

        let any: Ipv4Network = "0.0.0.0/0".parse().unwrap();
        assert!(check_reserved_ip(any).is_some());

        let public: Ipv4Network = "203.0.113.9".parse().unwrap();
        assert!(check_reserved_ip(public).is_none());
    }
}
