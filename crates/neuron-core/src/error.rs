use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum NeuronCoreError {
    #[snafu(display("Invalid hex string {value:?}"))]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid byte length: expected {expected} bytes, got {actual} bytes"))]
    InvalidLength {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid epoch {raw:?}: {reason}"))]
    InvalidEpoch {
        raw: String,
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Unknown script hash type {value:?}"))]
    InvalidHashType {
        value: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Claim epoch of a deposit at epoch {number} is out of range"))]
    EpochOverflow {
        number: u64,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid address {address:?}: {reason}"))]
    InvalidAddress {
        address: String,
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to encode address: {reason}"))]
    AddressEncodingFailed {
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid multisig config (m={m}, n={n}, r={r}): {reason}"))]
    InvalidMultisigConfig {
        m: u8,
        n: u8,
        r: u8,
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Output index {index} out of range for transaction {tx_hash}"))]
    OutputIndexOutOfRange {
        tx_hash: String,
        index: usize,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Genesis block does not carry the expected system cells: {reason}"))]
    MalformedGenesis {
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

pub type Result<T> = std::result::Result<T, NeuronCoreError>;
