use bytes::{BufMut, Bytes, BytesMut};

pub const FLUSH_PKT: &[u8] = b"0000";

/// Frames `data` as a single pkt-line: four lowercase hex digits holding
/// `len(data) + 4`, followed by the payload as is.
pub fn write_pkt_line(data: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(data.len() + 4);
    buf.put_slice(format!("{:04x}", data.len() + 4).as_bytes());
    buf.put_slice(data.as_bytes());
    buf
}

/// The preamble of a Smart HTTP ref advertisement:
/// `pkt-line("# service=<service>\n")` followed by a flush packet.
pub fn service_announcement(service: &str) -> Bytes {
    let mut buf = write_pkt_line(&format!("# service={}\n", service));
    buf.put_slice(FLUSH_PKT);
    buf.freeze()
}
