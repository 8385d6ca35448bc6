use thiserror::Error;

pub type DacResult<T> = ::std::result::Result<T, DacError>;

#[derive(Error, Debug)]
pub enum DacError {
    #[error("UCode CRC not known: {0:08x}")]
    UnknownUcode(u32),
    #[error("Savestate doesn't start with the expected magic")]
    BadSavestateMagic,
    #[error("Truncated savestate: expected {expected} bytes got {got}")]
    TruncatedSavestate { expected: usize, got: usize },
    #[error("Couldn't serialize savestate: {0}")]
    Serialize(#[from] flexbuffers::SerializationError),
    #[error("Couldn't deserialize savestate: {0}")]
    Deserialize(#[from] flexbuffers::DeserializationError),
    #[error("Bad savestate root: {0}")]
    BadSavestateRoot(#[from] flexbuffers::ReaderError),
}
