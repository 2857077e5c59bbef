//! Helpers for the SSH data type encodings of RFC 4251 section 5.
//!
//! Every reader checks the remaining length first, so a truncated or
//! malformed payload surfaces as a protocol error instead of a panic.

use bytes::{Buf, BufMut};

pub(crate) fn get_u8<B: Buf>(mut b: B) -> Result<u8, crate::Error> {
    if b.remaining() < 1 {
        return Err(crate::Error::protocol("truncated byte"));
    }
    Ok(b.get_u8())
}

pub(crate) fn get_bool<B: Buf>(b: B) -> Result<bool, crate::Error> {
    get_u8(b).map(|v| v != 0)
}

pub(crate) fn get_u32<B: Buf>(mut b: B) -> Result<u32, crate::Error> {
    if b.remaining() < 4 {
        return Err(crate::Error::protocol("truncated uint32"));
    }
    Ok(b.get_u32())
}

pub(crate) fn get_ssh_string<B: Buf>(mut b: B) -> Result<Vec<u8>, crate::Error> {
    let len = get_u32(&mut b)? as usize;
    if b.remaining() < len {
        return Err(crate::Error::protocol("truncated string"));
    }
    let mut s = vec![0u8; len];
    b.copy_to_slice(&mut s[..]);
    Ok(s)
}

/// Reads a string and decodes it as UTF-8, replacing invalid sequences.
pub(crate) fn get_utf8<B: Buf>(b: B) -> Result<String, crate::Error> {
    let raw = get_ssh_string(b)?;
    Ok(match String::from_utf8(raw) {
        Ok(s) => s,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

pub(crate) fn get_name_list<B: Buf>(b: B) -> Result<Vec<String>, crate::Error> {
    let raw = get_ssh_string(b)?;
    let raw = std::str::from_utf8(&raw)
        .map_err(|_| crate::Error::protocol("name-list is not ASCII"))?;
    Ok(split_name_list(raw))
}

pub(crate) fn split_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

pub(crate) fn put_ssh_string<B: BufMut>(mut b: B, s: &[u8]) {
    let len = s.len() as u32;
    b.put_u32(len);
    b.put_slice(s);
}

pub(crate) fn put_bool<B: BufMut>(mut b: B, v: bool) {
    b.put_u8(v as u8);
}

pub(crate) fn put_name_list<B: BufMut, S: AsRef<str>>(b: B, names: &[S]) {
    let joined = names
        .iter()
        .map(|name| name.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    put_ssh_string(b, joined.as_bytes());
}

/// Writes `s` as an `mpint`, interpreting it as an unsigned big-endian integer.
pub(crate) fn put_mpint<B: BufMut>(mut b: B, s: &[u8]) {
    let s = strip_leading_zeros(s);
    match s.get(0) {
        Some(&first) if first & 0x80 != 0 => {
            b.put_u32(s.len() as u32 + 1);
            b.put_u8(0);
            b.put_slice(s);
        }
        Some(..) => put_ssh_string(b, s),
        None => b.put_u32(0),
    }
}

pub(crate) fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let i = s.iter().take_while(|&&c| c == 0).count();
    &s[i..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpint_encoding() {
        // https://tools.ietf.org/html/rfc4251#section-5
        let cases: &[(&[u8], &[u8])] = &[
            (&[0x00], &[0x00, 0x00, 0x00, 0x00]),
            (&[0x00, 0x00, 0x00], &[0x00, 0x00, 0x00, 0x00]),
            (
                &[0x09, 0xA3, 0x78, 0xF9, 0xB2, 0xE3, 0x32, 0xA7],
                &[
                    0x00, 0x00, 0x00, 0x08, 0x09, 0xA3, 0x78, 0xF9, 0xB2, 0xE3, 0x32, 0xA7,
                ],
            ),
            (
                &[0x00, 0x00, 0x09, 0xA3, 0x78, 0xF9, 0xB2, 0xE3, 0x32, 0xA7],
                &[
                    0x00, 0x00, 0x00, 0x08, 0x09, 0xA3, 0x78, 0xF9, 0xB2, 0xE3, 0x32, 0xA7,
                ],
            ),
            (&[0x80], &[0x00, 0x00, 0x00, 0x02, 0x00, 0x80]),
            (&[0x00, 0x00, 0x80], &[0x00, 0x00, 0x00, 0x02, 0x00, 0x80]),
        ];
        for (input, expected) in cases {
            let mut out = vec![];
            put_mpint(&mut out, input);
            assert_eq!(&out[..], *expected, "input = {:02x?}", input);
        }
    }

    #[test]
    fn truncated_string_is_protocol_error() {
        let mut buf: &[u8] = &[0x00, 0x00, 0x00, 0x05, b'a', b'b'];
        let err = get_ssh_string(&mut buf).unwrap_err();
        assert!(matches!(err, crate::Error::Protocol(..)));
    }

    #[test]
    fn name_list_round_trip_skips_empty_names() {
        let mut out = vec![];
        put_name_list(&mut out, &["publickey", "password"]);
        let names = get_name_list(&mut &out[..]).unwrap();
        assert_eq!(names, vec!["publickey", "password"]);

        assert!(split_name_list("").is_empty());
        assert_eq!(split_name_list("a,,b"), vec!["a", "b"]);
    }
}
