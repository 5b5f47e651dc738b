// SPDX-License-Identifier: BSD-3-Clause

//! Wire encoding/decoding for the two ring datagram kinds: the bare token marker and the
//! `;`-prefixed data frame. See the invariants on [`DataFrame`] checksums: the checksum covers
//! origin, destination and payload only, never the control field, so a relay hop can rewrite
//! control to `ACK`/`NAK` without invalidating the sender's integrity check.

use std::fmt;

use log::trace;
use rand::Rng;

/// Reserved destination meaning "every node on the ring". Termination of a broadcast cycle is
/// detected by the origin seeing its own frame return, not by any per-recipient acknowledgment.
pub const BROADCAST: &str = "TODOS";

const TOKEN_LITERAL: &str = "1000";
const DATA_PREFIX: &str = "2000;";

/// A frame's control field. `NoRecipientYet` is the value a frame is minted with; relays rewrite
/// it to `Ack`/`Nak` only when they are the addressed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    NoRecipientYet,
    Ack,
    Nak,
    /// Any other token in the control position. Treated the same as `NoRecipientYet` by the
    /// engine's self-origin handling, but kept distinct so a malformed peer's behaviour is
    /// visible in logs instead of silently coerced.
    Unknown(String),
}

impl Control {
    fn as_wire(&self) -> &str {
        match self {
            Control::NoRecipientYet => "maquinanaoexiste",
            Control::Ack => "ACK",
            Control::Nak => "NAK",
            Control::Unknown(s) => s,
        }
    }

    fn from_wire(s: &str) -> Self {
        match s {
            "maquinanaoexiste" => Control::NoRecipientYet,
            "ACK" => Control::Ack,
            "NAK" => Control::Nak,
            other => Control::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// A decoded ring datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Token,
    Data(DataFrame),
}

/// A data frame: origin, destination, control, checksum, and the opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub origin: String,
    pub destination: String,
    pub control: Control,
    pub checksum: u32,
    pub payload: String,
}

impl DataFrame {
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }
}

/// Errors recognized while decoding an inbound datagram. A datagram that fails to decode is
/// logged by the caller and dropped; it is never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Empty,
    UnknownFrameKind,
    MalformedDataFrame { reason: String },
    BadChecksumFormat,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty datagram"),
            Self::UnknownFrameKind => write!(f, "datagram is neither a token nor a data frame"),
            Self::MalformedDataFrame { reason } => write!(f, "malformed data frame: {reason}"),
            Self::BadChecksumFormat => write!(f, "checksum field is not a decimal u32"),
        }
    }
}

/// Computes the checksum covering `origin:destination:payload`. The control field is deliberately
/// excluded so a relay can rewrite it without needing to re-sign the frame.
fn compute_checksum(origin: &str, destination: &str, payload: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(origin.as_bytes());
    hasher.update(b":");
    hasher.update(destination.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    hasher.finalize()
}

/// Returns the literal token datagram.
pub fn encode_token() -> Vec<u8> {
    TOKEN_LITERAL.as_bytes().to_vec()
}

/// Encodes a data frame, computing its checksum from origin/destination/payload.
pub fn encode_data(origin: &str, destination: &str, control: &Control, payload: &str) -> Vec<u8> {
    let checksum = compute_checksum(origin, destination, payload);
    format!("{DATA_PREFIX}{origin}:{destination}:{control}:{checksum}:{payload}").into_bytes()
}

/// Builds a [`DataFrame`] directly (without a wire round trip), computing its checksum from
/// origin/destination/payload.
pub fn build_data_frame(
    origin: &str,
    destination: &str,
    control: Control,
    payload: &str,
) -> DataFrame {
    DataFrame {
        origin: origin.to_string(),
        destination: destination.to_string(),
        checksum: compute_checksum(origin, destination, payload),
        control,
        payload: payload.to_string(),
    }
}

fn encode_frame(frame: &DataFrame) -> Vec<u8> {
    format!(
        "{DATA_PREFIX}{}:{}:{}:{}:{}",
        frame.origin, frame.destination, frame.control, frame.checksum, frame.payload
    )
    .into_bytes()
}

/// Classifies and decodes a raw datagram. Anything that is neither the trimmed token literal nor
/// a well-formed `2000;...` data frame is a [`DecodeError`] and MUST be dropped by the caller.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::MalformedDataFrame {
        reason: "not valid utf-8".to_string(),
    })?;
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    if trimmed == TOKEN_LITERAL {
        trace!("decoded token frame");
        return Ok(Frame::Token);
    }

    let Some(rest) = trimmed.strip_prefix(DATA_PREFIX) else {
        return Err(DecodeError::UnknownFrameKind);
    };

    // Left-to-right split into exactly 5 fields; the payload absorbs any remaining ':'.
    let fields: Vec<&str> = rest.splitn(5, ':').collect();
    let [origin, destination, control, checksum, payload] = fields.as_slice() else {
        return Err(DecodeError::MalformedDataFrame {
            reason: format!("expected 5 fields, got {}", fields.len()),
        });
    };

    let checksum: u32 = checksum
        .parse()
        .map_err(|_| DecodeError::BadChecksumFormat)?;

    let frame = DataFrame {
        origin: origin.to_string(),
        destination: destination.to_string(),
        control: Control::from_wire(control),
        checksum,
        payload: payload.to_string(),
    };

    trace!(
        "decoded data frame {} -> {} ({} bytes payload)",
        frame.origin,
        frame.destination,
        frame.payload.len()
    );

    Ok(Frame::Data(frame))
}

/// Recomputes the checksum from the frame's origin/destination/payload and compares it against
/// the frame's stored checksum field.
pub fn verify(frame: &DataFrame) -> bool {
    compute_checksum(&frame.origin, &frame.destination, &frame.payload) == frame.checksum
}

/// Returns a copy of `frame` with `control` replaced. The checksum is untouched since it never
/// covered control in the first place.
pub fn rewrite_control(frame: &DataFrame, new_control: Control) -> DataFrame {
    DataFrame {
        control: new_control,
        ..frame.clone()
    }
}

/// With probability `p` (`0.0..=1.0`), replaces the frame's checksum with a fresh random 32-bit
/// value guaranteed to differ from the original, returning whether an error was introduced.
/// Deterministic (never introduces an error) when `p == 0.0`.
pub fn inject_error(frame: &DataFrame, p: f64) -> (DataFrame, bool) {
    if p <= 0.0 || !rand::rng().random_bool(p.clamp(0.0, 1.0)) {
        return (frame.clone(), false);
    }

    let mut rng = rand::rng();
    let mut corrupted = loop {
        let candidate: u32 = rng.random();
        if candidate != frame.checksum {
            break candidate;
        }
    };
    // extra paranoia against the overwhelmingly unlikely case the loop above is compiled away
    if corrupted == frame.checksum {
        corrupted ^= 1;
    }

    let mut out = frame.clone();
    out.checksum = corrupted;
    (out, true)
}

/// Re-encodes a decoded [`DataFrame`] back to wire bytes.
pub fn encode(frame: &DataFrame) -> Vec<u8> {
    encode_frame(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(origin: &str, destination: &str, control: Control, payload: &str) -> DataFrame {
        let checksum = compute_checksum(origin, destination, payload);
        DataFrame {
            origin: origin.to_string(),
            destination: destination.to_string(),
            control,
            checksum,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn checksum_survives_any_control_value() {
        for ctrl in [Control::NoRecipientYet, Control::Ack, Control::Nak] {
            let bytes = encode_data("Alice", "Bob", &ctrl, "hi");
            let Frame::Data(f) = decode(&bytes).unwrap() else {
                panic!("expected data frame");
            };
            assert!(verify(&f));
        }
    }

    #[test]
    fn control_rewrite_preserves_verify_outcome() {
        let f = frame("Alice", "Bob", Control::NoRecipientYet, "hi");
        let before = verify(&f);
        let after = rewrite_control(&f, Control::Ack);
        assert_eq!(before, verify(&after));
    }

    #[test]
    fn error_injection_always_fails_verify_at_full_probability() {
        let f = frame("Alice", "Bob", Control::NoRecipientYet, "hi");
        let (corrupted, introduced) = inject_error(&f, 1.0);
        assert!(introduced);
        assert!(!verify(&corrupted));
    }

    #[test]
    fn error_injection_is_noop_at_p_zero() {
        let f = frame("Alice", "Bob", Control::NoRecipientYet, "hi");
        let (same, introduced) = inject_error(&f, 0.0);
        assert!(!introduced);
        assert_eq!(same, f);
    }

    #[test]
    fn data_frame_survives_encode_decode_round_trip() {
        let bytes = encode_data("Alice", "Bob", &Control::Ack, "hello:world");
        let Frame::Data(f) = decode(&bytes).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(f.origin, "Alice");
        assert_eq!(f.destination, "Bob");
        assert_eq!(f.control, Control::Ack);
        assert_eq!(f.payload, "hello:world");
    }

    #[test]
    fn token_frame_decodes_with_or_without_whitespace() {
        assert_eq!(decode(&encode_token()).unwrap(), Frame::Token);
        // trimmed whitespace must still be recognized
        assert_eq!(decode(b"  1000\n").unwrap(), Frame::Token);
    }

    #[test]
    fn chained_control_rewrites_match_a_single_rewrite_to_the_final_value() {
        let f = frame("Alice", "Bob", Control::NoRecipientYet, "hi");
        let once = rewrite_control(&rewrite_control(&f, Control::Ack), Control::Nak);
        let direct = rewrite_control(&f, Control::Nak);
        assert_eq!(once, direct);
    }

    #[test]
    fn payload_with_colon_survives_round_trip() {
        let bytes = encode_data("Alice", "Bob", &Control::NoRecipientYet, "a:b:c:d");
        let Frame::Data(f) = decode(&bytes).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(f.payload, "a:b:c:d");
        assert!(verify(&f));
    }

    #[test]
    fn empty_payload_round_trips() {
        let bytes = encode_data("Alice", "Bob", &Control::NoRecipientYet, "");
        let Frame::Data(f) = decode(&bytes).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(f.payload, "");
        assert!(verify(&f));
    }

    #[test]
    fn unknown_control_value_decodes_without_error() {
        let bytes = b"2000;Alice:Bob:WEIRD:123:payload";
        let Frame::Data(f) = decode(bytes).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(f.control, Control::Unknown("WEIRD".to_string()));
    }

    #[test]
    fn garbage_datagram_is_a_decode_error() {
        assert!(decode(b"not a ring datagram").is_err());
        assert!(decode(b"").is_err());
        assert!(decode(b"2000;too:few:fields").is_err());
    }
}
