//! The send side state machine as a pure transition function.
//!
//! ```text
//! Ready -> StartSending -> SendingHeaders -> StartBody -> SendingBody -> Sent -> Ready
//!                                                                          \-> WaitResponse -> Ready
//! ```
//!
//! [`transition`] maps the current [`SendState`] and one [`SendInput`] to the next
//! state and the [`Effect`] the [`Sender`](super::Sender) has to carry out. It
//! never touches a transport or a stream, which keeps every path of the machine
//! testable on its own.

use crate::protocol::PayloadSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendState {
    /// Nothing in flight.
    Ready,
    /// A message is loaded; its head is about to be written.
    StartSending,
    /// Part of the head is still waiting for transport room.
    SendingHeaders,
    /// The head is out; the body framing is decided next.
    StartBody,
    SendingBody,
    /// The whole message is out.
    Sent,
    /// Client only: sent, but the connection may not send again before the response.
    WaitResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendInput {
    /// The transport can take bytes; `outbound` tells whether a message is loaded.
    Writable { outbound: bool },
    /// Result of writing head bytes.
    HeadProgress { complete: bool },
    /// The framing the body goes out with.
    BodyPlan(PayloadSize),
    /// Result of pumping body bytes.
    BodyProgress { finished: bool, progressed: bool },
    /// The message cycle is acknowledged by its owner.
    Acknowledge { await_response: bool },
    /// The response the connection waited for has completed.
    ResponseDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing to do.
    Idle,
    /// No synchronous progress is possible right now.
    Stall,
    WriteHead,
    /// Wrap the body into chunked framing, then pump it.
    WrapChunked,
    /// Pump the body as is.
    PassThrough,
    PumpBody,
    /// Drop the (wrapped) body now that it is drained.
    ReleaseBody,
    /// The cycle is over; the machine is back at `Ready`.
    Complete,
    /// The cycle is over but the next send waits for the response.
    AwaitResponse,
    /// The input does not apply to the state; nothing changes.
    Ignore,
}

/// Computes the next state and the effect to perform.
pub fn transition(state: SendState, input: SendInput) -> (SendState, Effect) {
    use Effect as E;
    use SendInput as I;
    use SendState as S;

    match (state, input) {
        (S::Ready, I::Writable { outbound: false }) => (S::Ready, E::Idle),
        (S::Ready, I::Writable { outbound: true }) => (S::StartSending, E::WriteHead),

        (S::StartSending | S::SendingHeaders, I::HeadProgress { complete: true }) => (S::StartBody, E::Idle),
        (S::StartSending | S::SendingHeaders, I::HeadProgress { complete: false }) => (S::SendingHeaders, E::Stall),
        (S::SendingHeaders, I::Writable { .. }) => (S::SendingHeaders, E::WriteHead),

        (S::StartBody, I::BodyPlan(PayloadSize::Empty)) => (S::Sent, E::ReleaseBody),
        (S::StartBody, I::BodyPlan(PayloadSize::Chunked)) => (S::SendingBody, E::WrapChunked),
        (S::StartBody, I::BodyPlan(PayloadSize::Length(_) | PayloadSize::UntilClose)) => (S::SendingBody, E::PassThrough),

        (S::SendingBody, I::Writable { .. }) => (S::SendingBody, E::PumpBody),
        (S::SendingBody, I::BodyProgress { finished: true, .. }) => (S::Sent, E::ReleaseBody),
        (S::SendingBody, I::BodyProgress { finished: false, progressed: true }) => (S::SendingBody, E::PumpBody),
        (S::SendingBody, I::BodyProgress { finished: false, progressed: false }) => (S::SendingBody, E::Stall),

        (S::Sent, I::Acknowledge { await_response: false }) => (S::Ready, E::Complete),
        (S::Sent, I::Acknowledge { await_response: true }) => (S::WaitResponse, E::AwaitResponse),
        (S::WaitResponse, I::ResponseDone) => (S::Ready, E::Complete),
        (S::WaitResponse, I::Writable { .. }) => (S::WaitResponse, E::Stall),

        (state, _) => (state, E::Ignore),
    }
}
