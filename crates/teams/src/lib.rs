//! Microsoft Teams interface: Bot Framework activities in, adaptive cards out.
//!
//! ```text
//! POST /api/messages → Activity → ActivityDispatcher → handler → ReplyMessage
//!                                                        ↓
//!                          ConnectorClient (proactive replies after OAuth callbacks)
//! ```

pub mod activity;
pub mod auth_state;
pub mod cards;
pub mod connector;
pub mod events;

pub use activity::{Activity, ActivityKind, ChannelAccount, ConversationAccount, ConversationReference};
pub use auth_state::{AuthStateBlob, AuthStateError};
pub use cards::ReplyMessage;
pub use connector::{BotConnector, ConnectorClient, ConnectorError, InMemoryConnector};
pub use events::{ActivityDispatcher, ActivityHandler, ActivityHandlerError, HandlerResult, TurnContext, WelcomeHandler};
