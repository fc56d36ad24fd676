//! ASCII85 (btoa flavour, no `<~ ~>` delimiters) for token-wrapped keys
//!
//! Token-wrapped identity files hold the RSA ciphertext of an age key as
//! ASCII85 text. Every 4 input bytes become 5 characters in `!`..=`u`; an
//! all-zero group is written as `z`; a trailing group of `n` bytes becomes
//! `n + 1` characters. Whitespace is ignored when decoding.
//!
//! Small enough to carry here rather than pull in a crate for it.

use std::io::{self, Read};

const FIRST: u8 = b'!';
const LAST: u8 = b'u';

/// Encode bytes as ASCII85 text.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(4) * 5);
    for group in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..group.len()].copy_from_slice(group);
        let mut value = u32::from_be_bytes(word);

        if group.len() == 4 && value == 0 {
            out.push('z');
            continue;
        }

        let mut digits = [0u8; 5];
        for d in digits.iter_mut().rev() {
            *d = (value % 85) as u8 + FIRST;
            value /= 85;
        }
        for d in &digits[..group.len() + 1] {
            out.push(*d as char);
        }
    }
    out
}

/// Decode ASCII85 text held in memory.
pub fn decode(text: &str) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() / 5 * 4);
    Decoder::new(text.as_bytes()).read_to_end(&mut out)?;
    Ok(out)
}

/// Streaming ASCII85 decoder over any reader.
pub struct Decoder<R> {
    inner: R,
    group: [u8; 5],
    filled: usize,
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl<R: Read> Decoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            group: [0; 5],
            filled: 0,
            pending: Vec::new(),
            offset: 0,
            finished: false,
        }
    }

    fn feed(&mut self, byte: u8) -> io::Result<()> {
        match byte {
            b' ' | b'\t' | b'\n' | b'\r' | 0x0c => Ok(()),
            b'z' if self.filled == 0 => {
                self.pending.extend_from_slice(&[0; 4]);
                Ok(())
            }
            FIRST..=LAST => {
                self.group[self.filled] = byte - FIRST;
                self.filled += 1;
                if self.filled == 5 {
                    let word = group_value(&self.group)?;
                    self.pending.extend_from_slice(&word.to_be_bytes());
                    self.filled = 0;
                }
                Ok(())
            }
            other => Err(invalid(format!("invalid ascii85 byte 0x{other:02x}"))),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self.filled {
            0 => Ok(()),
            1 => Err(invalid("truncated ascii85 group".to_string())),
            n => {
                for d in &mut self.group[n..] {
                    *d = LAST - FIRST;
                }
                let word = group_value(&self.group)?;
                self.pending.extend_from_slice(&word.to_be_bytes()[..n - 1]);
                self.filled = 0;
                Ok(())
            }
        }
    }
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = [0u8; 512];
        while self.offset == self.pending.len() && !self.finished {
            self.pending.clear();
            self.offset = 0;
            let n = self.inner.read(&mut input)?;
            if n == 0 {
                self.finish()?;
                self.finished = true;
            } else {
                for &byte in &input[..n] {
                    self.feed(byte)?;
                }
            }
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

fn group_value(digits: &[u8; 5]) -> io::Result<u32> {
    let value = digits
        .iter()
        .fold(0u64, |acc, d| acc * 85 + u64::from(*d));
    u32::try_from(value).map_err(|_| invalid("ascii85 group overflows 32 bits".to_string()))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
