use crate::{config::DatabaseConfig, models::posts::Post};
use redditsync_db::models::reddit_post;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema, Set,
    sea_query::{Index, OnConflict, Query},
};
use std::time::Duration;
use tracing::{debug, instrument};

const CREATED_AT_INDEX: &str = "idx_reddit_posts_created_at";

/// Opens the connection pool. The caller owns it and is expected to close it.
#[instrument(skip(database_url, config), fields(max_connections = config.max_connections))]
pub async fn connect(
    database_url: &str,
    config: &DatabaseConfig,
) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(config.max_connections.max(1))
        .min_connections(1)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(5 * 60))
        .max_lifetime(Duration::from_secs(30 * 60))
        .sqlx_logging(false);

    Database::connect(opt).await
}

/// Creates `reddit_posts` and its `created_at` index when missing.
#[instrument(skip(db))]
pub async fn ensure_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(reddit_post::Entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    let index = Index::create()
        .if_not_exists()
        .name(CREATED_AT_INDEX)
        .table(reddit_post::Entity)
        .col(reddit_post::Column::CreatedAt)
        .to_owned();
    db.execute(backend.build(&index)).await?;

    debug!("reddit_posts schema ensured");
    Ok(())
}

fn to_active_model(post: &Post) -> reddit_post::ActiveModel {
    reddit_post::ActiveModel {
        id: Set(post.id.clone()),
        title: Set(Some(post.title.clone())),
        author: Set(post.author.clone()),
        score: Set(post.score),
        num_comments: Set(post.num_comments),
        created_at: Set(post.created_at),
        url: Set(Some(post.url.clone())),
    }
}

/// Inserts the batch in one statement; ids already stored get every non-key
/// column overwritten. Ids within `posts` must be unique.
#[instrument(skip(db, posts), fields(batch_size = posts.len()))]
pub async fn upsert_posts<C: ConnectionTrait>(db: &C, posts: &[Post]) -> Result<u64, DbErr> {
    if posts.is_empty() {
        return Ok(0);
    }

    let on_conflict = OnConflict::column(reddit_post::Column::Id)
        .update_columns([
            reddit_post::Column::Title,
            reddit_post::Column::Author,
            reddit_post::Column::Score,
            reddit_post::Column::NumComments,
            reddit_post::Column::CreatedAt,
            reddit_post::Column::Url,
        ])
        .to_owned();

    let rows = reddit_post::Entity::insert_many(posts.iter().map(to_active_model))
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;

    debug!(rows, "Posts upserted");
    Ok(rows)
}

/// How many of `ids` are already stored.
#[instrument(skip(db, ids), fields(ids = ids.len()))]
pub async fn count_existing<C: ConnectionTrait>(db: &C, ids: &[&str]) -> Result<u64, DbErr> {
    if ids.is_empty() {
        return Ok(0);
    }

    reddit_post::Entity::find()
        .filter(reddit_post::Column::Id.is_in(ids.iter().copied()))
        .count(db)
        .await
}

#[instrument(skip(db))]
pub async fn count_posts<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    reddit_post::Entity::find().count(db).await
}

/// Deletes up to `limit` rows with the oldest `created_at`. Returns how many
/// were actually removed, which is fewer when the table is smaller.
#[instrument(skip(db))]
pub async fn delete_oldest<C: ConnectionTrait>(db: &C, limit: u64) -> Result<u64, DbErr> {
    if limit == 0 {
        return Ok(0);
    }

    let oldest = Query::select()
        .column(reddit_post::Column::Id)
        .from(reddit_post::Entity)
        .order_by(reddit_post::Column::CreatedAt, Order::Asc)
        .order_by(reddit_post::Column::Id, Order::Asc)
        .limit(limit)
        .to_owned();

    let result = reddit_post::Entity::delete_many()
        .filter(reddit_post::Column::Id.in_subquery(oldest))
        .exec(db)
        .await?;

    debug!(requested = limit, deleted = result.rows_affected, "Oldest posts deleted");
    Ok(result.rows_affected)
}

/// Newest posts first.
#[instrument(skip(db))]
pub async fn latest_posts<C: ConnectionTrait>(
    db: &C,
    limit: u64,
) -> Result<Vec<reddit_post::Model>, DbErr> {
    reddit_post::Entity::find()
        .order_by_desc(reddit_post::Column::CreatedAt)
        .order_by_asc(reddit_post::Column::Id)
        .limit(limit)
        .all(db)
        .await
}
