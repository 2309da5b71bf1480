use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;

use tracing::debug;
use yamlink_codec::{flags, iter_attrs, msg_type, split_messages, MessageBuilder};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

const NETLINK_GENERIC: libc::c_int = 16;
const SOL_NETLINK: libc::c_int = 270;
const NETLINK_ADD_MEMBERSHIP: libc::c_int = 1;
const NETLINK_BROADCAST_ERROR: libc::c_int = 4;
const NETLINK_EXT_ACK: libc::c_int = 11;

/// The generic-netlink control family, used for name resolution.
const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_VERSION: u8 = 1;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const CTRL_ATTR_MCAST_GROUPS: u16 = 7;
const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;

const RECV_BUF_SIZE: usize = 32 * 1024;

/// A connected generic-netlink socket.
///
/// Family and group ids are resolved through the kernel's control family and
/// cached for the life of the socket.
pub struct GenlSocket {
    fd: RawFd,
    port: u32,
    seq: u32,
    seq_check: bool,
    auto_ack: bool,
    family_cache: HashMap<String, u16>,
}

impl GenlSocket {
    /// Open and bind a generic-netlink socket, learning the kernel-assigned
    /// port id.
    pub fn connect() -> Result<Self> {
        // SAFETY: plain syscall, no pointers involved.
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_GENERIC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let mut addr_len = std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;

        // SAFETY: addr is a valid sockaddr_nl and addr_len matches its size.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                addr_len,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        // SAFETY: same pointer/length pair as the bind above.
        let rc = unsafe {
            libc::getsockname(
                fd,
                &mut addr as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        debug!(port = addr.nl_pid, "generic-netlink socket bound");

        Ok(Self {
            fd,
            port: addr.nl_pid,
            seq: 0,
            seq_check: true,
            auto_ack: true,
            family_cache: HashMap::new(),
        })
    }

    /// Whether replies are still paired with request sequence numbers.
    pub fn seq_check_enabled(&self) -> bool {
        self.seq_check
    }

    /// Whether kernel-originated events are expected to be acknowledged.
    pub fn auto_ack_enabled(&self) -> bool {
        self.auto_ack
    }

    fn set_sockopt(&self, opt: libc::c_int, state: libc::c_int) -> Result<()> {
        if self.fd < 0 {
            return Err(TransportError::BadSocket);
        }
        // SAFETY: state is a valid c_int for the length passed.
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                SOL_NETLINK,
                opt,
                &state as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Query the control family for `family`, returning the raw reply.
    fn get_family(&mut self, family: &str) -> Result<Vec<u8>> {
        let seq = self.next_seq();
        let mut msg = MessageBuilder::new(
            GENL_ID_CTRL,
            flags::REQUEST,
            seq,
            self.port,
            CTRL_CMD_GETFAMILY,
            CTRL_VERSION,
        );
        msg.put_str(CTRL_ATTR_FAMILY_NAME, family);
        self.send(&msg.finish())?;

        loop {
            match self.recv() {
                Ok(datagram) => return Ok(datagram),
                Err(TransportError::Interrupted) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn resolve_error(family: &str, code: i32) -> TransportError {
        TransportError::ResolveFamily {
            family: family.to_string(),
            source: io::Error::from_raw_os_error(-code),
        }
    }
}

impl Transport for GenlSocket {
    fn recv(&mut self) -> Result<Vec<u8>> {
        if self.fd < 0 {
            return Err(TransportError::BadSocket);
        }
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        // SAFETY: buf is writable for RECV_BUF_SIZE bytes.
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Err(TransportError::Interrupted);
            }
            return Err(err.into());
        }
        buf.truncate(n as usize);
        Ok(buf)
    }

    fn send(&mut self, msg: &[u8]) -> Result<()> {
        if self.fd < 0 {
            return Err(TransportError::BadSocket);
        }
        // SAFETY: msg is readable for msg.len() bytes.
        let n = unsafe { libc::send(self.fd, msg.as_ptr() as *const libc::c_void, msg.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn local_port(&self) -> u32 {
        self.port
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn resolve_family(&mut self, family: &str) -> Result<u16> {
        if let Some(&id) = self.family_cache.get(family) {
            return Ok(id);
        }

        let reply = self.get_family(family)?;
        for message in split_messages(&reply) {
            let message = message?;
            if message.header.msg_type == msg_type::ERROR {
                let code = message
                    .payload
                    .get(..4)
                    .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
                    .unwrap_or(-libc::EINVAL);
                return Err(Self::resolve_error(family, code));
            }
            let (_, attrs) = message.genl_payload()?;
            for attr in iter_attrs(attrs) {
                let attr = attr?;
                if attr.atype() == CTRL_ATTR_FAMILY_ID {
                    let id = attr.get_u16()?;
                    self.family_cache.insert(family.to_string(), id);
                    debug!(family, id, "resolved generic-netlink family");
                    return Ok(id);
                }
            }
        }
        Err(Self::resolve_error(family, -libc::ENOENT))
    }

    fn join_group(&mut self, family: &str, group: &str) -> Result<()> {
        let reply = self.get_family(family)?;
        for message in split_messages(&reply) {
            let message = message?;
            if message.header.msg_type == msg_type::ERROR {
                let code = message
                    .payload
                    .get(..4)
                    .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
                    .unwrap_or(-libc::EINVAL);
                return Err(Self::resolve_error(family, code));
            }
            let (_, attrs) = message.genl_payload()?;
            for attr in iter_attrs(attrs) {
                let attr = attr?;
                if attr.atype() != CTRL_ATTR_MCAST_GROUPS {
                    continue;
                }
                for entry in attr.nested() {
                    let entry = entry?;
                    let mut name = None;
                    let mut id = None;
                    for field in entry.nested() {
                        let field = field?;
                        match field.atype() {
                            CTRL_ATTR_MCAST_GRP_NAME => name = Some(field.get_str()?),
                            CTRL_ATTR_MCAST_GRP_ID => id = Some(field.get_u32()?),
                            _ => {}
                        }
                    }
                    if name == Some(group) {
                        if let Some(id) = id {
                            self.set_sockopt(NETLINK_ADD_MEMBERSHIP, id as libc::c_int)?;
                            debug!(family, group, id, "joined multicast group");
                            return Ok(());
                        }
                    }
                }
            }
        }
        Err(TransportError::UnknownGroup {
            family: family.to_string(),
            group: group.to_string(),
        })
    }

    fn set_broadcast_error(&mut self, enable: bool) -> Result<()> {
        self.set_sockopt(NETLINK_BROADCAST_ERROR, enable as libc::c_int)
    }

    fn set_ext_ack(&mut self, enable: bool) -> Result<()> {
        match self.set_sockopt(NETLINK_EXT_ACK, enable as libc::c_int) {
            // Older kernels do not know the option; that is not fatal.
            Err(TransportError::Io(err)) if err.raw_os_error() == Some(libc::ENOPROTOOPT) => Ok(()),
            other => other,
        }
    }

    fn disable_seq_check(&mut self) {
        self.seq_check = false;
    }

    fn disable_auto_ack(&mut self) {
        self.auto_ack = false;
    }
}

impl Drop for GenlSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // SAFETY: fd is an open descriptor owned by this struct.
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}
