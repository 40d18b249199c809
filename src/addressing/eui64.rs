/**
 * addressing/eui64.rs
 *
 * Modified EUI-64 interface identifiers (RFC 4291 appendix A)
 *
 * The low 64 bits of an EUI-64 address are the MAC split in half with
 * 0xFFFE inserted in the middle and the universal/local bit flipped.
 */

use std::net::Ipv6Addr;

use super::mac::MacAddress;

/// Universal/local bit, flipped during expansion
const UL_BIT: u8 = 0x02;

/// Recover the MAC embedded in an EUI-64 style address, if there is one
pub fn extract_eui64_mac(addr: &Ipv6Addr) -> Option<MacAddress> {
    let b = addr.octets();
    if b[11] != 0xFF || b[12] != 0xFE {
        return None;
    }

    Some(MacAddress::new([b[8] ^ UL_BIT, b[9], b[10], b[13], b[14], b[15]]))
}

/// Replace the interface identifier of `template` with one derived from `mac`
///
/// The network prefix (upper 64 bits) is kept, so the result is the address the
/// owner of `mac` would have autoconfigured on the same link or subnet.
pub fn inject_eui64_mac(template: &Ipv6Addr, mac: &MacAddress) -> Ipv6Addr {
    let mut b = template.octets();
    let m = mac.octets();

    b[8] = m[0] ^ UL_BIT;
    b[9] = m[1];
    b[10] = m[2];
    b[11] = 0xFF;
    b[12] = 0xFE;
    b[13] = m[3];
    b[14] = m[4];
    b[15] = m[5];

    Ipv6Addr::from(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_known_address() {
        let addr: Ipv6Addr = "fe80::1034:56ff:fe78:9abc".parse().unwrap();
        assert_eq!(
            extract_eui64_mac(&addr),
            Some("12:34:56:78:9a:bc".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_non_eui64() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(extract_eui64_mac(&addr), None);

        // FF/FE present but at the wrong offset
        let addr: Ipv6Addr = "fe80::ffef:1:2:3".parse().unwrap();
        assert_eq!(extract_eui64_mac(&addr), None);
    }

    #[test]
    fn test_inject_contact_mac() {
        let template: Ipv6Addr = "fe80::1034:56ff:fe78:9abc".parse().unwrap();
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let expected: Ipv6Addr = "fe80::a8bb:ccff:fedd:eeff".parse().unwrap();
        assert_eq!(inject_eui64_mac(&template, &mac), expected);
    }

    #[test]
    fn test_inject_keeps_prefix() {
        let template: Ipv6Addr = "2001:db8:1:2:3:4:5:6".parse().unwrap();
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let out = inject_eui64_mac(&template, &mac);
        assert_eq!(out.segments()[..4], template.segments()[..4]);
        assert_eq!(out, "2001:db8:1:2:211:22ff:fe33:4455".parse::<Ipv6Addr>().unwrap());
    }

    proptest! {
        #[test]
        fn prop_inject_then_extract_is_identity(template in any::<[u8; 16]>(), mac in any::<[u8; 6]>()) {
            let template = Ipv6Addr::from(template);
            let mac = MacAddress::new(mac);
            prop_assert_eq!(extract_eui64_mac(&inject_eui64_mac(&template, &mac)), Some(mac));
        }

        #[test]
        fn prop_extract_requires_fffe(mut bytes in any::<[u8; 16]>()) {
            if bytes[11] == 0xFF && bytes[12] == 0xFE {
                bytes[12] = 0x00;
            }
            prop_assert_eq!(extract_eui64_mac(&Ipv6Addr::from(bytes)), None);
        }
    }
}
