//! IM (instant messaging) adapters. Telegram is the only channel: `transport`
//! defines the channel-agnostic send/edit/keyboard interface, `telegram` implements
//! it and runs a full `Dispatcher` over both Message and CallbackQuery updates,
//! backed by `Bridge`.

pub mod commands;
pub mod telegram;
pub mod transport;
