//! SOCKS5 (RFC 1928) wire codec for the no-auth CONNECT subset.
//!
//! Both roles of the relay share this crate: the server side reads greetings
//! and requests and writes replies, the chaining side writes greetings and
//! requests and reads replies. Destinations are IPv4 literals or domain names.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
/// RFC 1928 "connection refused", sent for every failed upstream connect.
pub const REP_CONNECT_FAILED: u8 = 0x05;
pub const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

/// VER + NMETHODS + at most 255 methods.
pub const MAX_GREETING_LEN: usize = 2 + 255;

/// The only method selection the server ever sends.
pub const NO_AUTH_SELECTED: [u8; 2] = [VERSION, METHOD_NO_AUTH];

/// Length of a reply carrying an IPv4 bound address.
pub const REPLY_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too short")]
    TooShort,
    #[error("unsupported address type 0x{0:02x}")]
    UnsupportedAddressType(u8),
    #[error("domain name too long ({0} bytes, max 255)")]
    DomainTooLong(usize),
    #[error("too many methods offered ({0}, max 255)")]
    TooManyMethods(usize),
}

/// Destination of a CONNECT request.
///
/// Domain names are kept as the raw bytes the client sent, so a chained
/// request carries them unchanged even when they are not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Domain(Vec<u8>),
}

impl TargetAddr {
    /// Parse a host string, preferring the IPv4 literal form.
    pub fn from_host(host: &str) -> Self {
        match host.parse::<Ipv4Addr>() {
            Ok(ip) => TargetAddr::Ipv4(ip),
            Err(_) => TargetAddr::Domain(host.as_bytes().to_vec()),
        }
    }

    pub fn atyp(&self) -> u8 {
        match self {
            TargetAddr::Ipv4(_) => ATYP_IPV4,
            TargetAddr::Domain(_) => ATYP_DOMAIN,
        }
    }

    /// Host string handed to the resolver and to the dialer. Invalid UTF-8
    /// in a domain is replaced here only; the wire form keeps the raw bytes.
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ipv4(ip) => ip.to_string(),
            TargetAddr::Domain(name) => String::from_utf8_lossy(name).into_owned(),
        }
    }

    fn put(&self, b: &mut BytesMut) -> Result<(), Error> {
        match self {
            TargetAddr::Ipv4(ip) => {
                b.put_u8(ATYP_IPV4);
                b.extend_from_slice(&ip.octets());
            }
            TargetAddr::Domain(name) => {
                let len = name.len();
                if len > u8::MAX as usize {
                    return Err(Error::DomainTooLong(len));
                }
                b.put_u8(ATYP_DOMAIN);
                b.put_u8(len as u8);
                b.extend_from_slice(name);
            }
        }
        Ok(())
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(name) => f.write_str(&String::from_utf8_lossy(name)),
        }
    }
}

/// Client method-negotiation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    pub methods: Vec<u8>,
}

impl Greeting {
    /// Greeting offering only "no authentication required".
    pub fn no_auth() -> Self {
        Self {
            version: VERSION,
            methods: vec![METHOD_NO_AUTH],
        }
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let n = self.methods.len();
        if n > u8::MAX as usize {
            return Err(Error::TooManyMethods(n));
        }
        let mut b = BytesMut::with_capacity(2 + n);
        b.put_u8(self.version);
        b.put_u8(n as u8);
        b.extend_from_slice(&self.methods);
        Ok(b.freeze())
    }
}

/// Request frame: [VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u8,
    pub command: u8,
    pub addr: TargetAddr,
    pub port: u16,
}

impl Request {
    pub fn connect(addr: TargetAddr, port: u16) -> Self {
        Self {
            version: VERSION,
            command: CMD_CONNECT,
            addr,
            port,
        }
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut b = BytesMut::with_capacity(4 + 1 + 255 + 2);
        b.put_u8(self.version);
        b.put_u8(self.command);
        b.put_u8(0x00);
        self.addr.put(&mut b)?;
        b.put_u16(self.port);
        Ok(b.freeze())
    }

    /// Decode one request from the front of `src`, returning it with the
    /// number of bytes consumed. Version and command are not validated here.
    pub fn decode(src: &[u8]) -> Result<(Request, usize), Error> {
        if src.len() < 4 {
            return Err(Error::TooShort);
        }
        let (version, command, atyp) = (src[0], src[1], src[3]);
        let (addr, used) = match atyp {
            ATYP_IPV4 => {
                let o = src.get(4..8).ok_or(Error::TooShort)?;
                (TargetAddr::Ipv4(Ipv4Addr::new(o[0], o[1], o[2], o[3])), 8)
            }
            ATYP_DOMAIN => {
                let len = *src.get(4).ok_or(Error::TooShort)? as usize;
                let name = src.get(5..5 + len).ok_or(Error::TooShort)?;
                (TargetAddr::Domain(name.to_vec()), 5 + len)
            }
            x => return Err(Error::UnsupportedAddressType(x)),
        };
        let port = get_port(src, used)?;
        Ok((
            Request {
                version,
                command,
                addr,
                port,
            },
            used + 2,
        ))
    }
}

/// Bound endpoint carried in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// Reply frame: [VER | REP | RSV | ATYP | BND.ADDR | BND.PORT].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub bound: Bound,
}

impl Reply {
    /// Success reply reporting the local endpoint of the outbound socket.
    /// Only IPv4 is carried; any other family is reported as 0.0.0.0.
    pub fn success(local: SocketAddr) -> Self {
        let ip = match local.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        Self {
            status: REP_SUCCESS,
            bound: Bound::Ip(SocketAddr::V4(SocketAddrV4::new(ip, local.port()))),
        }
    }

    /// Failure reply with a zeroed IPv4 bound endpoint.
    pub fn failure(status: u8) -> Self {
        Self {
            status,
            bound: Bound::Ip(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))),
        }
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut b = BytesMut::with_capacity(REPLY_LEN);
        b.put_u8(VERSION);
        b.put_u8(self.status);
        b.put_u8(0x00);
        match &self.bound {
            Bound::Ip(SocketAddr::V4(a)) => {
                b.put_u8(ATYP_IPV4);
                b.extend_from_slice(&a.ip().octets());
                b.put_u16(a.port());
            }
            Bound::Ip(SocketAddr::V6(a)) => {
                b.put_u8(ATYP_IPV6);
                b.extend_from_slice(&a.ip().octets());
                b.put_u16(a.port());
            }
            Bound::Domain(name, port) => {
                if name.len() > u8::MAX as usize {
                    return Err(Error::DomainTooLong(name.len()));
                }
                b.put_u8(ATYP_DOMAIN);
                b.put_u8(name.len() as u8);
                b.extend_from_slice(name.as_bytes());
                b.put_u16(*port);
            }
        }
        Ok(b.freeze())
    }

    /// Decode one reply from the front of `src`. All three address types are
    /// accepted since an upstream may bind on any of them.
    pub fn decode(src: &[u8]) -> Result<(Reply, usize), Error> {
        if src.len() < 4 {
            return Err(Error::TooShort);
        }
        let status = src[1];
        let (bound, used) = match src[3] {
            ATYP_IPV4 => {
                let o = src.get(4..8).ok_or(Error::TooShort)?;
                let ip = Ipv4Addr::new(o[0], o[1], o[2], o[3]);
                let port = get_port(src, 8)?;
                (Bound::Ip(SocketAddr::new(ip.into(), port)), 8)
            }
            ATYP_IPV6 => {
                let o = src.get(4..20).ok_or(Error::TooShort)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(o);
                let port = get_port(src, 20)?;
                (Bound::Ip(SocketAddr::new(Ipv6Addr::from(octets).into(), port)), 20)
            }
            ATYP_DOMAIN => {
                let len = *src.get(4).ok_or(Error::TooShort)? as usize;
                let name = src.get(5..5 + len).ok_or(Error::TooShort)?;
                let port = get_port(src, 5 + len)?;
                (
                    Bound::Domain(String::from_utf8_lossy(name).into_owned(), port),
                    5 + len,
                )
            }
            x => return Err(Error::UnsupportedAddressType(x)),
        };
        Ok((Reply { status, bound }, used + 2))
    }
}

fn get_port(src: &[u8], at: usize) -> Result<u16, Error> {
    let p = src.get(at..at + 2).ok_or(Error::TooShort)?;
    Ok(u16::from_be_bytes([p[0], p[1]]))
}

/// Read a client greeting: VER, NMETHODS, then exactly NMETHODS bytes.
pub async fn read_greeting<R>(r: &mut R) -> Result<Greeting, Error>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    r.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    r.read_exact(&mut methods).await?;
    Ok(Greeting {
        version: head[0],
        methods,
    })
}

/// Read a request frame. Returns `Ok(None)` when the peer closed the stream
/// before sending a single byte.
///
/// An unsupported address type is reported as soon as the header is read;
/// the address bytes that follow are left unread.
pub async fn read_request<R>(r: &mut R) -> Result<Option<Request>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4];
    if r.read(&mut buf[..1]).await? == 0 {
        return Ok(None);
    }
    r.read_exact(&mut buf[1..]).await?;
    read_address_tail(r, &mut buf, false).await?;
    Request::decode(&buf).map(|(req, _)| Some(req))
}

/// Read a complete reply frame, including a bound address of any type.
pub async fn read_reply<R>(r: &mut R) -> Result<Reply, Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4];
    r.read_exact(&mut buf).await?;
    read_address_tail(r, &mut buf, true).await?;
    Reply::decode(&buf).map(|(reply, _)| reply)
}

// Appends DST.ADDR and DST.PORT to a buffer already holding the 4-byte header.
async fn read_address_tail<R>(r: &mut R, buf: &mut Vec<u8>, allow_v6: bool) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let tail = match buf[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 if allow_v6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            r.read_exact(&mut len).await?;
            buf.push(len[0]);
            len[0] as usize + 2
        }
        x => return Err(Error::UnsupportedAddressType(x)),
    };
    let start = buf.len();
    buf.resize(start + tail, 0);
    r.read_exact(&mut buf[start..]).await?;
    Ok(())
}
