use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    //Marshal errors
    /// Serialized size differs from `marshal_size()`.
    #[error("wrong marshal size")]
    WrongMarshalSize,
    /// Destination buffer cannot hold the serialized packet.
    #[error("buffer too short to be written")]
    BufferTooShort,
    /// Input buffer ends before the declared structure does.
    #[error("packet too short to be read")]
    PacketTooShort,

    //RTCP errors
    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid packet version")]
    BadVersion,
    #[error("invalid padding value")]
    WrongPadding,
    #[error("wrong packet type")]
    WrongType,
    #[error("invalid total lost count")]
    InvalidTotalLost,
    #[error("too many reports")]
    TooManyReports,
    #[error("too many chunks")]
    TooManyChunks,
    #[error("too many sources")]
    TooManySources,
    #[error("SDES must be < 255 octets long")]
    SdesTextTooLong,
    #[error("SDES item missing type")]
    SdesMissingType,
    #[error("reason must be < 255 octets long")]
    ReasonTooLong,
    #[error("empty compound packet")]
    EmptyCompound,
    #[error("first packet in compound must be SR or RR")]
    BadFirstPacket,
    #[error("compound missing SourceDescription with CNAME")]
    MissingCname,
    #[error("feedback packet seen before CNAME")]
    PacketBeforeCname,
    #[error("wrong feedback message type")]
    WrongFeedbackType,
    #[error("wrong payload type")]
    WrongPayloadType,
    #[error("missing REMB identifier")]
    MissingRembIdentifier,
    #[error("SSRC num and length do not match")]
    SsrcNumAndLengthMismatch,
    #[error("invalid bitrate")]
    InvalidBitrate,
    #[error("delta exceeds limit")]
    DeltaExceedLimit,
    #[error("packet status chunk must be 2 bytes")]
    PacketStatusChunkLength,
    #[error("wrong chunk type")]
    WrongChunkType,
    #[error("invalid block size")]
    InvalidBlockSize,

    //RTP errors
    #[error("RTP header size insufficient")]
    HeaderSizeInsufficient,
    #[error("RTP header size insufficient for extension")]
    HeaderSizeInsufficientForExtension,
    #[error("header extension id must be between 1 and 14 for RFC 5285 one byte extensions")]
    Rfc8285OneByteHeaderIdRange,
    #[error("header extension payload must be between 1 and 16 bytes for RFC 5285 one byte extensions")]
    Rfc8285OneByteHeaderSize,
    #[error("header extension id must be between 1 and 255 for RFC 5285 two byte extensions")]
    Rfc8285TwoByteHeaderIdRange,
    #[error("header extension payload must be 255 bytes or less for RFC 5285 two byte extensions")]
    Rfc8285TwoByteHeaderSize,
    #[error("header extension id must be 0 for non RFC 5285 extensions")]
    Rfc3550HeaderIdRange,
    #[error("extension not found")]
    HeaderExtensionNotFound,
    #[error("extensions not enabled on this header")]
    HeaderExtensionsNotEnabled,
    #[error("packet is not large enough")]
    ShortPacket,
    #[error("RTX payload must carry at least the original sequence number")]
    RtxPayloadTooShort,

    //Engine errors
    #[error("ssrc already handled [ssrc:{0}]")]
    DuplicateSsrc(u32),
    #[error("mid already handled [mid:{0}]")]
    DuplicateMid(String),
    #[error("rid already handled and no mid given [rid:{0}]")]
    DuplicateRid(String),
    #[error("invalid target bitrate")]
    InvalidTargetBitrate,
    #[error("retransmission buffer full")]
    RetransmissionBufferFull,
    #[error("send buffer full")]
    SendBufferFull,
    #[error("transport closed")]
    TransportClosed,
}
