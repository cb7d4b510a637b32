use crate::{
    auth::AuthUser,
    entities::{activity_log, UserRole},
    errors::ServiceError,
};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityFilter {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub page: u64,
    pub per_page: u64,
}

/// Read side of the activity log written by the event processor
pub struct ActivityService {
    db: Arc<DatabaseConnection>,
}

impl ActivityService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn recent(
        &self,
        user: &AuthUser,
        filter: ActivityFilter,
    ) -> Result<(Vec<activity_log::Model>, u64), ServiceError> {
        user.require_any(&[UserRole::Admin])?;

        let mut query = activity_log::Entity::find();
        if let Some(user_id) = filter.user_id {
            query = query.filter(activity_log::Column::UserId.eq(user_id));
        }
        if let Some(action) = filter.action.filter(|a| !a.is_empty()) {
            query = query.filter(activity_log::Column::Action.eq(action));
        }

        let paginator = query
            .order_by_desc(activity_log::Column::CreatedAt)
            .order_by_desc(activity_log::Column::LogId)
            .paginate(&*self.db, filter.per_page.max(1));
        let total = paginator.num_items().await?;
        let entries = paginator.fetch_page(filter.page.max(1) - 1).await?;
        Ok((entries, total))
    }
}
