// Path: crates/tss/src/signature.rs
use crate::error::TssError;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use bitcoin::secp256k1::ecdsa::Signature;

fn decode_scalar(name: &str, b64: &str) -> Result<Vec<u8>, TssError> {
    let raw = B64
        .decode(b64)
        .map_err(|e| TssError::Decode(format!("{name}: {e}")))?;
    // Strip leading zeros so a 33-byte big-endian encoding still fits.
    let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    let trimmed = raw.get(first..).unwrap_or_default().to_vec();
    if trimmed.len() > 32 {
        return Err(TssError::Decode(format!("{name} longer than 32 bytes")));
    }
    Ok(trimmed)
}

/// Builds the compact `R‖S` signature from the service's base64 scalars: each part
/// left-padded to 32 bytes, S normalised to the lower half of the curve order.
pub fn normalize_signature(r_b64: &str, s_b64: &str) -> Result<[u8; 64], TssError> {
    let r = decode_scalar("R", r_b64)?;
    let s = decode_scalar("S", s_b64)?;
    let mut compact = [0u8; 64];
    if let Some(dst) = compact.get_mut(32 - r.len()..32) {
        dst.copy_from_slice(&r);
    }
    if let Some(dst) = compact.get_mut(64 - s.len()..64) {
        dst.copy_from_slice(&s);
    }
    let mut sig =
        Signature::from_compact(&compact).map_err(|e| TssError::Decode(e.to_string()))?;
    sig.normalize_s();
    Ok(sig.serialize_compact())
}

/// Decodes the base64 recovery id.
pub fn decode_recovery_id(b64: &str) -> Result<Vec<u8>, TssError> {
    B64.decode(b64)
        .map_err(|e| TssError::Decode(format!("recovery id: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};

    #[test]
    fn pads_and_normalises_high_s() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let msg = Message::from_digest([0x42; 32]);
        let sig = secp.sign_ecdsa(&msg, &sk);
        let compact = sig.serialize_compact();
        let (r, s) = compact.split_at(32);

        // Flip S to the high half: n - s.
        let n: [u8; 32] = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c,
            0xd0, 0x36, 0x41, 0x41,
        ];
        let mut high_s = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut d = n[i] as i16 - s[i] as i16 - borrow;
            borrow = if d < 0 {
                d += 256;
                1
            } else {
                0
            };
            high_s[i] = d as u8;
        }

        let out = normalize_signature(&B64.encode(r), &B64.encode(high_s)).unwrap();
        assert_eq!(out, compact);

        // Leading zeros stripped from R still pad back to the same bytes.
        let short_r: Vec<u8> = r.iter().copied().skip_while(|b| *b == 0).collect();
        let out = normalize_signature(&B64.encode(short_r), &B64.encode(s)).unwrap();
        assert_eq!(out, compact);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(normalize_signature("!!", "AA==").is_err());
        assert!(normalize_signature(&B64.encode([1u8; 40]), &B64.encode([1u8; 32])).is_err());
        assert_eq!(decode_recovery_id("AQ==").unwrap(), vec![1]);
    }
}
