//! Telegram IM channel: transport (send/edit/keyboard) plus a `teloxide` `Dispatcher`
//! handling both `Message` and `CallbackQuery` updates. Supersedes the teacher's
//! `im/channels/telegram.rs`, which only handled `Message` via `teloxide::repl()` and
//! had no inline-keyboard support.

use std::sync::Arc;

use teloxide::payloads::{EditMessageTextSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use teloxide::dptree;

use crate::bridge::Bridge;
use crate::im::commands::planmode;
use crate::im::transport::{ImChannelCapabilities, ImTransport, Keyboard, SendError, SendResult};
use crate::log::{prefix, truncate_content_default};

pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;
const TELEGRAM_API_GET_ME: &str = "https://api.telegram.org/bot";

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.text.clone(), b.callback_data.clone()))
            .collect::<Vec<_>>()
    }))
}

#[async_trait::async_trait]
impl ImTransport for TelegramTransport {
    fn capabilities(&self) -> ImChannelCapabilities {
        ImChannelCapabilities { supports_stream_edit: true, max_message_len: TELEGRAM_MAX_MESSAGE_LEN, channel_id_prefix: "telegram" }
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<SendResult, SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        let text = truncate_to_max(text);
        let msg = self.bot.send_message(chat_id, text).await.map_err(|e| SendError::Other(e.to_string()))?;
        Ok(Some(msg.id.0))
    }

    async fn edit_message(&self, channel_id: &str, message_id: i32, text: &str) -> Result<(), SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        let text = truncate_to_max(text);
        self.bot
            .edit_message_text(chat_id, MessageId(message_id), text)
            .await
            .map_err(|e| SendError::Other(e.to_string()))?;
        Ok(())
    }

    async fn send_with_keyboard(&self, channel_id: &str, text: &str, keyboard: &Keyboard) -> Result<SendResult, SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        let text = truncate_to_max(text);
        let msg = self
            .bot
            .send_message(chat_id, text)
            .reply_markup(to_markup(keyboard))
            .await
            .map_err(|e| SendError::Other(e.to_string()))?;
        Ok(Some(msg.id.0))
    }

    async fn edit_with_keyboard(&self, channel_id: &str, message_id: i32, text: &str, keyboard: Option<&Keyboard>) -> Result<(), SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        let text = truncate_to_max(text);
        let mut req = self.bot.edit_message_text(chat_id, MessageId(message_id), text);
        if let Some(keyboard) = keyboard {
            req = req.reply_markup(to_markup(keyboard));
        }
        req.await.map_err(|e| SendError::Other(e.to_string()))?;
        if keyboard.is_none() {
            let _ = self.bot.edit_message_reply_markup(chat_id, MessageId(message_id)).await;
        }
        Ok(())
    }

    async fn answer_callback_query(&self, callback_query_id: &str, toast: Option<&str>) -> Result<(), SendError> {
        let mut req = self.bot.answer_callback_query(callback_query_id);
        if let Some(text) = toast {
            req.text = Some(text.to_string());
        }
        req.await.map_err(|e| SendError::Other(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: i32) -> Result<(), SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        self.bot
            .delete_message(chat_id, MessageId(message_id))
            .await
            .map_err(|e| SendError::Other(e.to_string()))?;
        Ok(())
    }
}

fn parse_chat_id(channel_id: &str) -> Result<teloxide::types::ChatId, SendError> {
    let s = channel_id
        .strip_prefix("telegram:")
        .ok_or_else(|| SendError::Other("invalid channel_id (expected telegram:CHAT_ID)".into()))?;
    let id: i64 = s.parse().map_err(|_| SendError::Other(format!("invalid telegram chat_id: {}", channel_id)))?;
    Ok(teloxide::types::ChatId(id))
}

fn truncate_to_max(text: &str) -> String {
    if text.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        text.to_string()
    } else {
        text[..TELEGRAM_MAX_MESSAGE_LEN].to_string()
    }
}

async fn on_message(bot: Bot, msg: Message, bridge: Arc<Bridge<TelegramTransport>>) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let channel_id = format!("telegram:{}", chat_id.0);
    let owner_id = msg.from.as_ref().map(|u| u.id.0.to_string()).unwrap_or_else(|| "0".to_string());

    let Some(text) = msg.text() else {
        let _ = bot.send_message(chat_id, "Send me a text message.").await;
        return Ok(());
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        let _ = bot.send_message(chat_id, "Send me a non-empty message.").await;
        return Ok(());
    }

    eprintln!("{} chat_id={} direction=incoming content={}", prefix("telegram"), chat_id.0, truncate_content_default(&text));

    if let Some(args) = text.strip_prefix("/planmode") {
        let reply = planmode::handle(bridge.chat_prefs(), &chat_id.0.to_string(), args);
        let _ = bot.send_message(chat_id, planmode::render_reply(&reply)).await;
        return Ok(());
    }

    let _ = bot.send_chat_action(chat_id, teloxide::types::ChatAction::Typing).await;

    bridge.handle_message(channel_id, chat_id.0.to_string(), owner_id, text).await;
    Ok(())
}

async fn on_callback_query(query: CallbackQuery, bridge: Arc<Bridge<TelegramTransport>>) -> ResponseResult<()> {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    let channel_id = query
        .message
        .as_ref()
        .map(|m| format!("telegram:{}", m.chat().id.0))
        .unwrap_or_default();
    bridge.handle_callback(channel_id, query.id.clone(), data).await;
    Ok(())
}

async fn check_telegram_api(token: &str) -> Result<(), String> {
    let url = format!("{}{}/getMe", TELEGRAM_API_GET_ME, token);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| format!("reqwest client: {}", e))?;
    let res = client.get(&url).send().await.map_err(|e| format!("Telegram API unreachable: {}", e))?;
    if !res.status().is_success() {
        return Err(format!("getMe returned status {}", res.status()));
    }
    Ok(())
}

/// Check the token and construct the bot + transport + bridge, without starting the
/// dispatch loop. Split out so a host binary can share one `Bridge` between the
/// Telegram dispatcher and other trigger sources (e.g. the webhook server).
pub async fn bootstrap() -> Option<(Bot, Arc<Bridge<TelegramTransport>>)> {
    let config = crate::config::ensure_loaded();
    let token = match config.telegram_bot_token.as_deref() {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => {
            eprintln!("{} config=missing bot_token disabled", prefix("telegram"));
            return None;
        }
    };

    if let Err(e) = check_telegram_api(&token).await {
        eprintln!("{} config=api_check_failed error={}", prefix("telegram"), e);
        return None;
    }

    let bot = Bot::new(&token);
    match bot.get_me().await {
        Ok(me) => eprintln!("{} event=bot_started bot=@{}", prefix("telegram"), me.user.username.as_deref().unwrap_or("?")),
        Err(e) => {
            eprintln!("{} config=get_me_failed error={}", prefix("telegram"), e);
            return None;
        }
    }

    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let bridge = Arc::new(Bridge::new(transport, config.working_dir.clone()));
    Some((bot, bridge))
}

/// Run the dispatch loop over both update kinds, backed by `bridge`. Returns when the
/// bot stops (e.g. Ctrl+C, if no other shutdown path cancels it first).
pub async fn run_dispatcher(bot: Bot, bridge: Arc<Bridge<TelegramTransport>>) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback_query));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![bridge])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// Boot the Telegram channel end-to-end: API check, then dispatch. No-op if
/// `telegram_bot_token` isn't set. Convenience wrapper for callers that don't need to
/// share the `Bridge` with another trigger source.
pub async fn run_telegram_bot() {
    if let Some((bot, bridge)) = bootstrap().await {
        run_dispatcher(bot, bridge).await;
    }
}
