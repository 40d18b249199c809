/**
 * ffi/addresses.rs
 *
 * FFI bindings for address discovery
 *
 * All results are JSON strings. These calls block on OS queries, so the
 * host should not make them from its UI thread.
 */

use super::*;
use crate::addressing::{
    extract_eui64_mac, ranked_candidates, AddressBook, CandidateAddress, CandidateGenerator,
};
use std::net::Ipv6Addr;

/// Own interface addresses and MACs as a JSON array of
/// `{"address": .., "device": .., "multicast": ..}`
#[no_mangle]
pub extern "C" fn meshcall_own_addresses() -> *mut c_char {
    guard(|| {
        let entries = AddressBook::system().list_own_addresses();
        to_json(&entries)
    })
}

/// Ranked candidates for a contact
///
/// `addresses_json` is a JSON array of MAC / address strings,
/// `last_working` may be null. Returns a JSON array of `host:port` strings,
/// best first.
#[no_mangle]
pub extern "C" fn meshcall_candidates(
    addresses_json: *const c_char,
    last_working: *const c_char,
    port: u16,
) -> *mut c_char {
    guard(|| {
        let (addresses, last_working) = match candidate_input(addresses_json, last_working) {
            Ok(input) => input,
            Err(e) => {
                set_last_error(e);
                return std::ptr::null_mut();
            }
        };

        let generator = CandidateGenerator::system();
        let ranked: Vec<String> =
            ranked_candidates(&generator, &addresses, last_working.as_ref(), port)
                .iter()
                .map(ToString::to_string)
                .collect();
        to_json(&ranked)
    })
}

/// MAC embedded in an EUI-64 IPv6 address, or null if there is none
#[no_mangle]
pub extern "C" fn meshcall_eui64_mac(ipv6: *const c_char) -> *mut c_char {
    guard(|| {
        let Some(text) = c_str_to_rust(ipv6) else {
            set_last_error("Null address");
            return std::ptr::null_mut();
        };

        // Accept and ignore a zone suffix
        let bare = text.split('%').next().unwrap_or_default();
        match bare.trim().parse::<Ipv6Addr>() {
            Ok(ip) => match extract_eui64_mac(&ip) {
                Some(mac) => rust_to_c_str(&mac.to_string()),
                None => std::ptr::null_mut(),
            },
            Err(e) => {
                set_last_error(format!("Invalid IPv6 address {}: {}", text, e));
                std::ptr::null_mut()
            }
        }
    })
}

fn candidate_input(
    addresses_json: *const c_char,
    last_working: *const c_char,
) -> Result<(Vec<String>, Option<CandidateAddress>), String> {
    let json = c_str_to_rust(addresses_json).ok_or("Invalid addresses")?;
    let addresses: Vec<String> =
        serde_json::from_str(&json).map_err(|e| format!("Invalid addresses JSON: {}", e))?;

    let last_working = match c_str_to_rust(last_working) {
        Some(s) if !s.trim().is_empty() => Some(
            s.parse::<CandidateAddress>()
                .map_err(|e| format!("Invalid last working address: {}", e))?,
        ),
        _ => None,
    };

    Ok((addresses, last_working))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => rust_to_c_str(&json),
        Err(e) => {
            set_last_error(format!("Serialization failed: {}", e));
            std::ptr::null_mut()
        }
    }
}
