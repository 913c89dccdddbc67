// Bech32 address handling for the staking and consensus layers.
//
// A validator has one key pair but several encodings of it:
// - valoper: operator address (staking layer), bech32 over 20 bytes
// - valcons: consensus address, bech32 over the pubkey hash
// - account: same bytes as valoper under the chain's base prefix
//
// The pubkey hash is the identity found in block precommits.

use bech32::{FromBase32, ToBase32, Variant};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{CONS_ADDRESS_SIZE, VALCONS_SEGMENT, VALOPER_SEGMENT};

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid bech32 string: {0}")]
    Bech32(#[from] bech32::Error),
    #[error("invalid bech32 payload")]
    Payload,
    #[error("address prefix '{0}' does not contain the segment '{1}'")]
    Segment(String, &'static str),
    #[error("unsupported consensus key type '{0}'")]
    UnsupportedKeyType(String),
    #[error("consensus pubkey has invalid length {0}")]
    KeyLength(usize),
}

// Consensus key flavors found in the staking validator record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsKeyType {
    Ed25519,
    Secp256k1,
}

impl ConsKeyType {
    // Map the protobuf Any type_url to a key flavor
    pub fn from_type_url(url: &str) -> Result<Self, AddressError> {
        match url {
            "/cosmos.crypto.ed25519.PubKey" => Ok(Self::Ed25519),
            "/cosmos.crypto.secp256k1.PubKey" => Ok(Self::Secp256k1),
            other => Err(AddressError::UnsupportedKeyType(other.to_string())),
        }
    }
}

// Decode any bech32 address into its prefix and raw payload bytes
pub fn decode(address: &str) -> Result<(String, Vec<u8>), AddressError> {
    let (hrp, data, _) = bech32::decode(address)?;
    let bytes = Vec::<u8>::from_base32(&data).map_err(|_| AddressError::Payload)?;
    Ok((hrp, bytes))
}

// Encode raw bytes under the given prefix
pub fn encode(hrp: &str, bytes: &[u8]) -> Result<String, AddressError> {
    Ok(bech32::encode(hrp, bytes.to_base32(), Variant::Bech32)?)
}

// Hash a consensus pubkey into the 20-byte address used in precommit
// signatures. Ed25519 takes the first 20 bytes of sha256, secp256k1
// goes through ripemd160(sha256).
pub fn consensus_address(
    pubkey: &[u8],
    kind: ConsKeyType,
) -> Result<[u8; CONS_ADDRESS_SIZE], AddressError> {
    let expected = match kind {
        ConsKeyType::Ed25519 => 32,
        ConsKeyType::Secp256k1 => 33,
    };
    if pubkey.len() != expected {
        return Err(AddressError::KeyLength(pubkey.len()));
    }

    let mut out = [0u8; CONS_ADDRESS_SIZE];
    match kind {
        ConsKeyType::Ed25519 => {
            let digest = Sha256::digest(pubkey);
            out.copy_from_slice(&digest[..CONS_ADDRESS_SIZE]);
        }
        ConsKeyType::Secp256k1 => {
            let digest = Ripemd160::digest(Sha256::digest(pubkey));
            out.copy_from_slice(&digest);
        }
    }
    Ok(out)
}

// Derive the valcons address for the consensus address bytes by
// swapping the "valoper" segment of the operator prefix
pub fn valcons_address(valoper: &str, cons_bytes: &[u8]) -> Result<String, AddressError> {
    let (hrp, _) = decode(valoper)?;
    let base = hrp
        .strip_suffix(VALOPER_SEGMENT)
        .ok_or_else(|| AddressError::Segment(hrp.clone(), VALOPER_SEGMENT))?;
    encode(&format!("{}{}", base, VALCONS_SEGMENT), cons_bytes)
}

// Re-encode the valoper payload under the chain's base account prefix.
// Used to look up governance votes, which are cast from the account
// address backing the operator key.
pub fn account_address(valoper: &str) -> Result<String, AddressError> {
    let (hrp, bytes) = decode(valoper)?;
    let base = hrp
        .strip_suffix(VALOPER_SEGMENT)
        .ok_or_else(|| AddressError::Segment(hrp.clone(), VALOPER_SEGMENT))?;
    encode(base, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPER_BYTES: [u8; 20] = [
        0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77,
        0x88, 0x99, 0xaa, 0xbb, 0xcc,
    ];

    #[test]
    fn test_roundtrip() {
        let encoded = encode("cosmosvaloper", &OPER_BYTES).unwrap();
        assert!(encoded.starts_with("cosmosvaloper1"));
        let (hrp, bytes) = decode(&encoded).unwrap();
        assert_eq!(hrp, "cosmosvaloper");
        assert_eq!(bytes, OPER_BYTES);
    }

    #[test]
    fn test_valcons_swaps_segment() {
        let valoper = encode("junovaloper", &OPER_BYTES).unwrap();
        let cons = [0xffu8; 20];
        let valcons = valcons_address(&valoper, &cons).unwrap();
        assert!(valcons.starts_with("junovalcons1"));
        let (hrp, bytes) = decode(&valcons).unwrap();
        assert_eq!(hrp, "junovalcons");
        assert_eq!(bytes, cons.to_vec());
    }

    #[test]
    fn test_account_address_keeps_payload() {
        let valoper = encode("osmovaloper", &OPER_BYTES).unwrap();
        let account = account_address(&valoper).unwrap();
        let (hrp, bytes) = decode(&account).unwrap();
        assert_eq!(hrp, "osmo");
        assert_eq!(bytes, OPER_BYTES);
    }

    #[test]
    fn test_account_address_rejects_plain_prefix() {
        let plain = encode("cosmos", &OPER_BYTES).unwrap();
        assert!(matches!(
            account_address(&plain),
            Err(AddressError::Segment(_, _))
        ));
    }

    #[test]
    fn test_consensus_address_lengths() {
        let ed = consensus_address(&[7u8; 32], ConsKeyType::Ed25519).unwrap();
        assert_eq!(ed.len(), CONS_ADDRESS_SIZE);
        let secp = consensus_address(&[7u8; 33], ConsKeyType::Secp256k1).unwrap();
        assert_eq!(secp.len(), CONS_ADDRESS_SIZE);
        assert!(consensus_address(&[7u8; 16], ConsKeyType::Ed25519).is_err());
    }

    #[test]
    fn test_key_type_from_url() {
        assert_eq!(
            ConsKeyType::from_type_url("/cosmos.crypto.ed25519.PubKey").unwrap(),
            ConsKeyType::Ed25519
        );
        assert!(ConsKeyType::from_type_url("/cosmos.crypto.sr25519.PubKey").is_err());
    }
}
