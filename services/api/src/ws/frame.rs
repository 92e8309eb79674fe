//! Transport-neutral WebSocket frames.
//!
//! The client leg is an axum socket and the upstream leg a tokio-tungstenite
//! stream; both are adapted to [`Frame`] so the relay loop is written once.
//! Ping/pong frames are answered by each library and never relayed.

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage};
use bytes::Bytes;
use futures_util::{Sink, Stream};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{
    Message as WsMessage,
    protocol::{CloseFrame as WsCloseFrame, frame::coding::CloseCode},
};

use super::relay::RelayError;

/// Close code sent when the server refuses a session on policy grounds.
pub const POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn policy_violation(reason: impl Into<String>) -> Self {
        Self {
            code: POLICY_VIOLATION,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close(Option<CloseReason>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RelayError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, RelayError>> + Send>>;

impl Frame {
    pub fn from_axum(message: AxumMessage) -> Option<Self> {
        match message {
            AxumMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            AxumMessage::Binary(data) => Some(Frame::Binary(data)),
            AxumMessage::Close(close) => Some(Frame::Close(close.map(|c| CloseReason {
                code: c.code,
                reason: c.reason.as_str().to_owned(),
            }))),
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => None,
        }
    }

    pub fn into_axum(self) -> AxumMessage {
        match self {
            Frame::Text(text) => AxumMessage::Text(text.into()),
            Frame::Binary(data) => AxumMessage::Binary(data),
            Frame::Close(close) => AxumMessage::Close(close.map(|c| AxumCloseFrame {
                code: c.code,
                reason: c.reason.into(),
            })),
        }
    }

    pub fn from_tungstenite(message: WsMessage) -> Option<Self> {
        match message {
            WsMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            WsMessage::Binary(data) => Some(Frame::Binary(data)),
            WsMessage::Close(close) => Some(Frame::Close(close.map(|c| CloseReason {
                code: c.code.into(),
                reason: c.reason.as_str().to_owned(),
            }))),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => None,
        }
    }

    pub fn into_tungstenite(self) -> WsMessage {
        match self {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data),
            Frame::Close(close) => WsMessage::Close(close.map(|c| WsCloseFrame {
                code: CloseCode::from(c.code),
                reason: c.reason.into(),
            })),
        }
    }
}
