use crate::error::{Result, Socks5Error};
use crate::protocol::{AddressType, LEN_IPV4, LEN_IPV6};
use std::net::{Ipv4Addr, Ipv6Addr};

/// resolve_address renders the raw DST.ADDR / BND.ADDR bytes of the given
/// address type as a connectable host string. IP addresses come out in
/// canonical textual form, domain names are taken as-is; no DNS lookup
/// happens here, that is left to the connect step.
pub fn resolve_address(addr_type: AddressType, raw: &[u8]) -> Result<String> {
    match addr_type {
        AddressType::IPv4 => {
            let octets: [u8; LEN_IPV4] = raw
                .try_into()
                .map_err(|_| Socks5Error::InvalidField("IPv4 address must be 4 bytes"))?;
            Ok(Ipv4Addr::from(octets).to_string())
        }
        AddressType::IPv6 => {
            let octets: [u8; LEN_IPV6] = raw
                .try_into()
                .map_err(|_| Socks5Error::InvalidField("IPv6 address must be 16 bytes"))?;
            Ok(Ipv6Addr::from(octets).to_string())
        }
        AddressType::DomainName => std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| Socks5Error::InvalidField("domain name is not valid UTF-8")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ipv4() {
        let addr = resolve_address(AddressType::IPv4, &[123, 35, 13, 89]).unwrap();
        assert_eq!(addr, "123.35.13.89");
    }

    #[test]
    fn test_resolve_ipv6() {
        let mut raw = [0u8; 16];
        raw[15] = 1;
        assert_eq!(resolve_address(AddressType::IPv6, &raw).unwrap(), "::1");

        let raw = [
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x12, 0x34,
        ];
        assert_eq!(
            resolve_address(AddressType::IPv6, &raw).unwrap(),
            "2001:db8::1234"
        );
    }

    #[test]
    fn test_resolve_domain_is_verbatim() {
        let addr = resolve_address(AddressType::DomainName, b"example.com").unwrap();
        assert_eq!(addr, "example.com");
    }

    #[test]
    fn test_resolve_rejects_bad_input() {
        assert!(matches!(
            resolve_address(AddressType::IPv4, &[1, 2, 3]),
            Err(Socks5Error::InvalidField(_))
        ));
        assert!(matches!(
            resolve_address(AddressType::IPv6, &[0u8; 4]),
            Err(Socks5Error::InvalidField(_))
        ));
        assert!(matches!(
            resolve_address(AddressType::DomainName, &[0xff, 0xfe]),
            Err(Socks5Error::InvalidField(_))
        ));
    }
}
