//! WebSocket Push Hub
//!
//! Streams channel data to dashboard clients.
//!
//! ## Architecture
//!
//! - **BroadcastHub**: Owns connections and subscriptions, runs the channel loops
//! - **ChannelScheduler**: One cancellable repeating task per channel
//! - **Handler**: WebSocket upgrade and socket pumping
//! - **Messages**: Client and server frame formats
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3001/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'subscribe', channels: ['metrics:system']}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'data') console.log(msg.channel, msg.data);
//! };
//! ```

mod handler;
mod hub;
mod messages;
mod scheduler;

pub use handler::websocket_handler;
pub use hub::{
    BroadcastHub, ConnectionHandle, ConnectionId, Frame, HubConfig, HubError, HubStats,
    SubscribeOutcome, TickOutcome,
};
pub use messages::{now_ms, ClientMessage, ErrorCode, ProtocolError, ServerMessage};
pub use scheduler::ChannelScheduler;
