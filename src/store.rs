use crate::entity::{conversations, messages, user_profiles};
use crate::policy::PlanTier;
use crate::prompt::Mode;
use anyhow::{Context, Result};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Schema,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub mode: Mode,
    pub created_at_us: i64,
}

impl From<conversations::Model> for ConversationRecord {
    fn from(row: conversations::Model) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            mode: Mode::parse(&row.mode),
            created_at_us: row.created_at_us,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp_us: i64,
}

impl From<messages::Model> for MessageRecord {
    fn from(row: messages::Model) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            content: row.content,
            is_user: row.is_user,
            timestamp_us: row.timestamp_us,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRecord {
    pub user_id: String,
    pub plan: PlanTier,
}

impl From<user_profiles::Model> for ProfileRecord {
    fn from(row: user_profiles::Model) -> Self {
        Self {
            user_id: row.user_id,
            plan: PlanTier::parse(&row.plan),
        }
    }
}

pub struct ConversationStore {
    db: DatabaseConnection,
}

impl ConversationStore {
    pub async fn open(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("chat.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let db = Database::connect(db_url.as_str())
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Self::init(db).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Arc<Self>> {
        let db = Database::connect("sqlite::memory:").await?;
        Self::init(db).await
    }

    async fn init(db: DatabaseConnection) -> Result<Arc<Self>> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        for mut stmt in [
            schema.create_table_from_entity(conversations::Entity),
            schema.create_table_from_entity(messages::Entity),
            schema.create_table_from_entity(user_profiles::Entity),
        ] {
            db.execute(backend.build(stmt.if_not_exists())).await?;
        }

        info!("Conversation store ready (sqlite)");
        Ok(Arc::new(Self { db }))
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        mode: Mode,
    ) -> Result<ConversationRecord> {
        let record = ConversationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            mode,
            created_at_us: chrono::Utc::now().timestamp_micros(),
        };

        conversations::Entity::insert(conversations::ActiveModel {
            rowid: NotSet,
            id: Set(record.id.clone()),
            user_id: Set(record.user_id.clone()),
            title: Set(record.title.clone()),
            mode: Set(mode.as_str().to_string()),
            created_at_us: Set(record.created_at_us),
        })
        .exec(&self.db)
        .await?;

        Ok(record)
    }

    pub async fn conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let row = conversations::Entity::find()
            .filter(conversations::Column::Id.eq(id))
            .one(&self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn conversations_for(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        let rows = conversations::Entity::find()
            .filter(conversations::Column::UserId.eq(user_id))
            .order_by_desc(conversations::Column::CreatedAtUs)
            .order_by_desc(conversations::Column::Rowid)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn append_message(
        &self,
        conversation_id: &str,
        content: &str,
        is_user: bool,
    ) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            is_user,
            timestamp_us: chrono::Utc::now().timestamp_micros(),
        };

        messages::Entity::insert(messages::ActiveModel {
            rowid: NotSet,
            id: Set(record.id.clone()),
            conversation_id: Set(record.conversation_id.clone()),
            content: Set(record.content.clone()),
            is_user: Set(is_user),
            timestamp_us: Set(record.timestamp_us),
        })
        .exec(&self.db)
        .await?;

        Ok(record)
    }

    pub async fn messages_for(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        let rows = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .order_by_asc(messages::Column::TimestampUs)
            .order_by_asc(messages::Column::Rowid)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Profiles ride along with accounts, which are managed elsewhere,
    /// so the first sighting of a user reference creates a free-tier row.
    pub async fn ensure_profile(&self, user_id: &str) -> Result<ProfileRecord> {
        if let Some(existing) = user_profiles::Entity::find()
            .filter(user_profiles::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
        {
            return Ok(existing.into());
        }

        user_profiles::Entity::insert(user_profiles::ActiveModel {
            rowid: NotSet,
            user_id: Set(user_id.to_string()),
            plan: Set(PlanTier::Free.as_str().to_string()),
        })
        .exec(&self.db)
        .await?;

        info!("Created profile for user {}", user_id);
        Ok(ProfileRecord {
            user_id: user_id.to_string(),
            plan: PlanTier::Free,
        })
    }

    pub async fn set_plan(&self, user_id: &str, plan: PlanTier) -> Result<()> {
        let row = user_profiles::Entity::find()
            .filter(user_profiles::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?
            .with_context(|| format!("No profile for user {}", user_id))?;

        let mut active: user_profiles::ActiveModel = row.into();
        active.plan = Set(plan.as_str().to_string());
        active.update(&self.db).await?;
        Ok(())
    }
}
