//! Minimal Solidity ABI encoding and legacy transactions for the node-list contract calls.

use super::LedgerError;
use crate::key::keccak256;
use crate::key::ChainAddress;

use rlp::RlpStream;

const WORD: usize = 32;

/// Function selector: first 4 bytes of keccak256 of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Uint(u64),
    /// Full-width unsigned integer, big-endian.
    Word([u8; 32]),
    Address(ChainAddress),
    String(String),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_))
    }

    fn head(&self) -> [u8; 32] {
        let mut word = [0u8; WORD];
        match self {
            Token::Uint(v) => word[24..].copy_from_slice(&v.to_be_bytes()),
            Token::Word(w) => word = *w,
            Token::Address(a) => word[12..].copy_from_slice(a.as_bytes()),
            Token::String(_) => {}
        }
        word
    }
}

/// Encodes `selector || args` as contract call data.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut head = Vec::with_capacity(args.len() * WORD);
    let mut tail = Vec::new();

    for arg in args {
        if let Token::String(s) = arg {
            let offset = args.len() * WORD + tail.len();
            head.extend_from_slice(&Token::Uint(offset as u64).head());

            tail.extend_from_slice(&Token::Uint(s.len() as u64).head());
            tail.extend_from_slice(s.as_bytes());
            let padding = (WORD - s.len() % WORD) % WORD;
            tail.resize(tail.len() + padding, 0);
        } else {
            debug_assert!(!arg.is_dynamic());
            head.extend_from_slice(&arg.head());
        }
    }

    let mut data = selector(signature).to_vec();
    data.extend(head);
    data.extend(tail);
    data
}

/// Reader over ABI-encoded return data.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, start: usize, len: usize) -> Option<&'a [u8]> {
        self.data.get(start..start.checked_add(len)?)
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], LedgerError> {
        self.slice(offset, WORD).ok_or(LedgerError::Decode("return data too short"))
    }

    /// Head word at position `index`.
    pub fn word(&self, index: usize) -> Result<[u8; 32], LedgerError> {
        let mut out = [0u8; WORD];
        out.copy_from_slice(self.word_at(head_offset(index)?)?);
        Ok(out)
    }

    pub fn uint(&self, index: usize) -> Result<u64, LedgerError> {
        word_to_u64(self.word_at(head_offset(index)?)?)
    }

    pub fn bool(&self, index: usize) -> Result<bool, LedgerError> {
        Ok(self.word(index)? != [0u8; WORD])
    }

    pub fn string(&self, index: usize) -> Result<String, LedgerError> {
        let offset = to_usize(self.uint(index)?)?;
        let len = to_usize(word_to_u64(self.word_at(offset)?)?)?;
        let bytes = offset
            .checked_add(WORD)
            .and_then(|start| self.slice(start, len))
            .ok_or(LedgerError::Decode("string out of bounds"))?;

        String::from_utf8(bytes.to_vec()).map_err(|_| LedgerError::Decode("string is not utf-8"))
    }

    pub fn address_array(&self, index: usize) -> Result<Vec<ChainAddress>, LedgerError> {
        let offset = to_usize(self.uint(index)?)?;
        let len = to_usize(word_to_u64(self.word_at(offset)?)?)?;

        (0..len)
            .map(|i| {
                let position = (i + 1)
                    .checked_mul(WORD)
                    .and_then(|skip| offset.checked_add(skip))
                    .ok_or(LedgerError::Decode("array out of bounds"))?;
                let word = self.word_at(position)?;
                let mut address = [0u8; 20];
                address.copy_from_slice(&word[12..]);
                Ok(ChainAddress(address))
            })
            .collect()
    }
}

fn head_offset(index: usize) -> Result<usize, LedgerError> {
    index
        .checked_mul(WORD)
        .ok_or(LedgerError::Decode("head index overflows"))
}

fn word_to_u64(word: &[u8]) -> Result<u64, LedgerError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("integer overflows u64"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf))
}

fn to_usize(v: u64) -> Result<usize, LedgerError> {
    usize::try_from(v).map_err(|_| LedgerError::Decode("offset overflows usize"))
}

fn trim_leading_zeros(data: &[u8]) -> &[u8] {
    let first = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    &data[first..]
}

/// EIP-155 legacy transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub to: ChainAddress,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTx {
    fn append_fields(&self, stream: &mut RlpStream) {
        let to: &[u8] = self.to.as_bytes();
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas);
        stream.append(&to);
        stream.append(&self.value);
        stream.append(&self.data.as_slice());
    }

    /// RLP payload whose keccak256 is signed.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// Raw signed transaction from a 65-byte `r || s || recovery id` signature.
    pub fn encode_signed(&self, signature: &[u8; 65]) -> Vec<u8> {
        let v = u128::from(self.chain_id) * 2 + 35 + u128::from(signature[64]);
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(&signature[..32]));
        stream.append(&trim_leading_zeros(&signature[32..64]));
        stream.out().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_selectors() {
        let expected = [
            ("currentEpoch()", "76671808"),
            ("epochInfo(uint256)", "3894228e"),
            ("isWhitelisted(uint256,address)", "7d22c35c"),
            ("nodeRegistered(uint256,address)", "86470e9e"),
            ("getPssStatus(uint256,uint256)", "c7aa8ff7"),
            ("getNodes(uint256)", "47de074f"),
            ("nodeDetails(address)", "859da85f"),
            ("bufferSize()", "9c2c770b"),
            (
                "listNode(uint256,string,uint256,uint256,string,string)",
                "bf2d6f81",
            ),
        ];
        for (signature, hex_selector) in expected {
            assert_eq!(hex::encode(selector(signature)), hex_selector, "{signature}");
        }
    }

    #[test]
    fn encode_static_and_dynamic_args() {
        let data = encode_call(
            "listNode(uint256,string,uint256,uint256,string,string)",
            &[
                Token::Uint(3),
                Token::String("10.0.0.1:8080".into()),
                Token::Uint(1),
                Token::Uint(2),
                Token::String(String::new()),
                Token::String(String::new()),
            ],
        );
        let body = &data[4..];
        let args = Decoder::new(body);
        assert_eq!(args.uint(0).unwrap(), 3);
        // Six head words precede the first string.
        assert_eq!(args.uint(1).unwrap(), 6 * 32);
        assert_eq!(args.string(1).unwrap(), "10.0.0.1:8080");
        assert_eq!(args.string(4).unwrap(), "");
        assert_eq!(args.string(5).unwrap(), "");
        // heads + "10.0.0.1:8080" (len + 1 word) + two empty strings (len only)
        assert_eq!(body.len(), 6 * 32 + 2 * 32 + 2 * 32);
    }

    #[test]
    fn decode_address_array() {
        let mut data = Token::Uint(32).head().to_vec();
        data.extend(Token::Uint(2).head());
        data.extend(Token::Address(ChainAddress([0x11; 20])).head());
        data.extend(Token::Address(ChainAddress([0x22; 20])).head());

        let list = Decoder::new(&data).address_array(0).unwrap();
        assert_eq!(list, vec![ChainAddress([0x11; 20]), ChainAddress([0x22; 20])]);
        assert!(Decoder::new(&data[..64]).address_array(0).is_err());
    }

    #[test]
    fn hostile_offsets_are_rejected() {
        // String offset close to u64::MAX.
        let mut data = vec![0u8; 24];
        data.extend([0xff; 8]);
        data.extend([0u8; 32]);
        assert!(Decoder::new(&data).string(0).is_err());
        assert!(Decoder::new(&data).address_array(0).is_err());

        // Valid offset, string length close to u64::MAX.
        let mut data = Token::Uint(32).head().to_vec();
        data.extend([0u8; 24]);
        data.extend([0xff; 8]);
        assert!(matches!(
            Decoder::new(&data).string(0),
            Err(LedgerError::Decode(_))
        ));
        assert!(Decoder::new(&data).address_array(0).is_err());

        assert!(Decoder::new(&data).uint(usize::MAX).is_err());
    }

    #[test]
    fn eip155_signing_payload() {
        let tx = LegacyTx {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas: 21000,
            to: ChainAddress([0x35; 20]),
            value: 1_000_000_000_000_000_000,
            data: vec![],
            chain_id: 1,
        };
        assert_eq!(
            hex::encode(tx.signing_payload()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn eip155_signed_transaction() {
        let tx = LegacyTx {
            nonce: 0,
            gas_price: 1,
            gas: 100_000,
            to: ChainAddress([0x35; 20]),
            value: 0,
            data: vec![0xde, 0xad],
            chain_id: 31337,
        };
        let mut signature = [0x11u8; 65];
        signature[0] = 0;
        signature[64] = 1;

        let raw = tx.encode_signed(&signature);
        let decoded = rlp::Rlp::new(&raw);
        assert_eq!(decoded.item_count().unwrap(), 9);
        assert_eq!(decoded.val_at::<u64>(0).unwrap(), 0);
        assert_eq!(decoded.val_at::<u64>(2).unwrap(), 100_000);
        assert_eq!(decoded.at(3).unwrap().data().unwrap(), &[0x35; 20]);
        assert_eq!(decoded.at(5).unwrap().data().unwrap(), &[0xde, 0xad]);
        assert_eq!(decoded.val_at::<u64>(6).unwrap(), 31337 * 2 + 35 + 1);
        // Leading zero of r is not encoded.
        assert_eq!(decoded.at(7).unwrap().data().unwrap(), &signature[1..32]);
        assert_eq!(decoded.at(8).unwrap().data().unwrap(), &signature[32..64]);
    }
}
