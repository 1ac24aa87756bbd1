//! Linux-specific interface queries

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Read the primary IPv4 address of an interface (`SIOCGIFADDR`)
///
/// Returns `Ok(None)` when the interface does not exist or has no IPv4
/// address assigned.
pub fn interface_ipv4(name: &str) -> Result<Option<Ipv4Addr>> {
    let c_name = CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;
    let name_bytes = c_name.as_bytes_with_nul();
    if name_bytes.len() > libc::IFNAMSIZ {
        return Err(Error::Config(format!("interface name too long: {}", name)));
    }

    // SAFETY: plain socket(2) call, checked below
    let socket = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if socket < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    // SAFETY: ifreq is plain old data; the name fits in ifr_name (checked
    // above) and the ioctl only writes inside the struct
    let (result, err, ifr) = unsafe {
        let mut ifr: libc::ifreq = mem::zeroed();

        #[allow(clippy::unnecessary_cast)]
        std::ptr::copy_nonoverlapping(
            name_bytes.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name_bytes.len(),
        );
        ifr.ifr_ifru.ifru_addr.sa_family = libc::AF_INET as libc::sa_family_t;

        let result = libc::ioctl(socket, libc::SIOCGIFADDR as _, &mut ifr);
        let err = io::Error::last_os_error();
        libc::close(socket);
        (result, err, ifr)
    };

    if result < 0 {
        return match err.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::EADDRNOTAVAIL) => Ok(None),
            _ => Err(Error::Io(err)),
        };
    }

    // SAFETY: SIOCGIFADDR on an AF_INET socket fills ifru_addr with a sockaddr_in
    let addr = unsafe {
        let raw = &ifr.ifr_ifru.ifru_addr as *const libc::sockaddr as *const libc::sockaddr_in;
        (*raw).sin_addr.s_addr
    };

    Ok(Some(Ipv4Addr::from(u32::from_be(addr))))
}
