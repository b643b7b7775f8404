use std::sync::Arc;

use tracing::error;

use parley_db::Database;
use parley_gateway::connection::GatewayContext;
use parley_gateway::dispatcher::Dispatcher;
use parley_types::models::{Chat, ChatId, Message, MessageId, UserId};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: Arc<str>,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, jwt_secret: impl Into<Arc<str>>, dispatcher: Dispatcher) -> AppState {
        Arc::new(Self {
            db,
            jwt_secret: jwt_secret.into(),
            dispatcher,
        })
    }

    pub fn gateway(&self) -> GatewayContext {
        GatewayContext {
            dispatcher: self.dispatcher.clone(),
            db: self.db.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }

    /// Run blocking store work off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Storage(anyhow::anyhow!("store task failed: {}", e))
            })?
            .map_err(ApiError::Storage)
    }

    /// The chat, provided the user is currently one of its members.
    pub async fn member_chat(&self, chat_id: ChatId, user_id: UserId) -> ApiResult<Chat> {
        let (chat, member) = self
            .db(move |db| Ok((db.get_chat(chat_id)?, db.is_member(chat_id, user_id)?)))
            .await?;
        let chat = chat.ok_or_else(|| ApiError::NotFound(format!("chat {} not found", chat_id)))?;
        if !member {
            return Err(ApiError::not_member());
        }
        Ok(chat)
    }

    /// The message, provided the user is a member of the chat it belongs to.
    pub async fn member_message(&self, message_id: MessageId, user_id: UserId) -> ApiResult<Message> {
        let found = self
            .db(move |db| match db.get_message(message_id)? {
                Some(message) => {
                    let member = db.is_member(message.chat_id, user_id)?;
                    Ok(Some((message, member)))
                }
                None => Ok(None),
            })
            .await?;

        match found {
            Some((message, true)) => Ok(message),
            Some((_, false)) => Err(ApiError::not_member()),
            None => Err(ApiError::NotFound(format!("message {} not found", message_id))),
        }
    }
}
