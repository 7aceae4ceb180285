//! Maps `orc_domain::Error` kinds onto JSON-RPC error codes.
//!
//! Codes below -32000 are reserved by the JSON-RPC spec for
//! implementation-defined server errors; we carve out a range there rather
//! than reuse the standard `-326xx` codes, which mean something else
//! (parse error, invalid request, ...).

use orc_domain::Error;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub const CONVERSATION_NOT_FOUND: i64 = -32001;
pub const CONVERSATION_CLOSED: i64 = -32002;
pub const TURN_CLOSED: i64 = -32003;
pub const NO_OPEN_TURN: i64 = -32004;
pub const INVALID_FINALITY_FOR_TYPE: i64 = -32005;
pub const CLAIM_CONTENDED: i64 = -32006;
pub const SUBSCRIBER_OVERRUN: i64 = -32007;
pub const TRANSPORT_DISCONNECT: i64 = -32008;

pub fn code_for(err: &Error) -> i64 {
    match err {
        Error::ConversationNotFound(_) => CONVERSATION_NOT_FOUND,
        Error::ConversationClosed(_) => CONVERSATION_CLOSED,
        Error::TurnClosed { .. } => TURN_CLOSED,
        Error::NoOpenTurn(_) => NO_OPEN_TURN,
        Error::InvalidFinalityForType { .. } => INVALID_FINALITY_FOR_TYPE,
        Error::ClaimContended { .. } => CLAIM_CONTENDED,
        Error::SubscriberOverrun(_) => SUBSCRIBER_OVERRUN,
        Error::TransportDisconnect(_) => TRANSPORT_DISCONNECT,
        Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Other(_) => INTERNAL_ERROR,
    }
}

pub fn to_rpc_error(err: &Error) -> crate::RpcError {
    crate::RpcError {
        code: code_for(err),
        message: err.to_string(),
        data: None,
    }
}
