//! Authenticated session and bearer token persistence.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::ChatResult;
use super::types::{UserId, UserProfile};

/// Boxed future type for token store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for persisting the bearer token between runs.
pub trait TokenStore: Send + Sync {
    /// Load the persisted token, if any.
    fn load(&self) -> StoreFuture<'_, ChatResult<Option<String>>>;

    /// Persist a token, replacing any previous one.
    fn save(&self, token: &str) -> StoreFuture<'_, ChatResult<()>>;

    /// Remove the persisted token.
    fn clear(&self) -> StoreFuture<'_, ChatResult<()>>;
}

/// Token store backed by a single file.
#[derive(Clone, Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> StoreFuture<'_, ChatResult<Option<String>>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => {
                    let token = raw.trim();
                    Ok((!token.is_empty()).then(|| token.to_string()))
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn save(&self, token: &str) -> StoreFuture<'_, ChatResult<()>> {
        let token = token.to_string();
        Box::pin(async move {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&self.path, token).await?;
            debug!(path = %self.path.display(), "Token persisted");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> StoreFuture<'_, ChatResult<Option<String>>> {
        Box::pin(async move { Ok(self.token.read().await.clone()) })
    }

    fn save(&self, token: &str) -> StoreFuture<'_, ChatResult<()>> {
        let token = token.to_string();
        Box::pin(async move {
            *self.token.write().await = Some(token);
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            *self.token.write().await = None;
            Ok(())
        })
    }
}

/// The logged-in user together with their token.
///
/// Passed explicitly to the chat client instead of living in a global.
#[derive(Clone)]
pub struct Session {
    user: UserProfile,
    token: String,
    store: Arc<dyn TokenStore>,
}

impl Session {
    /// Create a session and persist its token.
    ///
    /// # Errors
    /// Returns an error if the token cannot be persisted.
    pub async fn establish(
        user: UserProfile,
        token: impl Into<String>,
        store: Arc<dyn TokenStore>,
    ) -> ChatResult<Self> {
        let token = token.into();
        store.save(&token).await?;
        info!(user_id = %user.id, role = user.role.as_str(), "Session established");
        Ok(Self { user, token, store })
    }

    /// The authenticated user.
    #[must_use]
    pub const fn user(&self) -> &UserProfile {
        &self.user
    }

    /// Shortcut for the authenticated user's id.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// The bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// End the session and forget the persisted token.
    ///
    /// # Errors
    /// Returns an error if the token cannot be removed.
    pub async fn logout(self) -> ChatResult<()> {
        self.store.clear().await?;
        info!(user_id = %self.user.id, "Logged out");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}
