use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row};
use tokio::sync::OnceCell;

/// One stored item. Every value is text, whatever its logical type.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub attribute: String,
    pub value: String,
}

impl Key {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// The four primitives the handler needs from a backend.
pub trait RecordStore {
    /// Every item of `collection`, unfiltered.
    fn scan(&self, collection: &str) -> impl Future<Output = anyhow::Result<Vec<Attributes>>> + Send;

    /// Write `item`, replacing whatever was stored under the same key.
    fn put(
        &self,
        collection: &str,
        key: &Key,
        item: Attributes,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Set `attributes` on the item under `key`, creating it when absent.
    fn update(
        &self,
        collection: &str,
        key: &Key,
        attributes: Attributes,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Remove the item under `key`. Removing an absent item is not an error.
    fn delete(&self, collection: &str, key: &Key) -> impl Future<Output = anyhow::Result<()>> + Send;
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and bring its schema up to date.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("fail to open database {url}"))?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database; one connection so every query sees the same data.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("fail to open in-memory database")?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("fail to migrate database")?;
        Ok(Self { pool })
    }
}

impl RecordStore for SqliteStore {
    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Attributes>> {
        let sql = format!("SELECT * FROM {}", quote(collection));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("fail to scan {collection}"))?;

        rows.iter()
            .map(|row| -> anyhow::Result<Attributes> {
                let mut item = Attributes::new();
                for column in row.columns() {
                    let value: Option<String> = row.try_get(column.ordinal())?;
                    if let Some(value) = value {
                        item.insert(column.name().to_string(), value);
                    }
                }
                Ok(item)
            })
            .collect()
    }

    async fn put(&self, collection: &str, key: &Key, item: Attributes) -> anyhow::Result<()> {
        let (columns, values) = split_columns(key, item);
        // REPLACE drops the old row first, so attributes absent from `item` end up NULL
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote(collection),
            columns.join(", "),
            placeholders(columns.len()),
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        query
            .execute(&self.pool)
            .await
            .with_context(|| format!("fail to put {} into {collection}", key.value))?;
        Ok(())
    }

    async fn update(&self, collection: &str, key: &Key, attributes: Attributes) -> anyhow::Result<()> {
        let (columns, values) = split_columns(key, attributes);
        let conflict = if columns.len() == 1 {
            "DO NOTHING".to_string()
        } else {
            let sets = columns[1..]
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect::<Vec<_>>();
            format!("DO UPDATE SET {}", sets.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {conflict}",
            quote(collection),
            columns.join(", "),
            placeholders(columns.len()),
            columns[0],
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        query
            .execute(&self.pool)
            .await
            .with_context(|| format!("fail to update {} in {collection}", key.value))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &Key) -> anyhow::Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(collection),
            quote(&key.attribute)
        );
        sqlx::query(&sql)
            .bind(key.value.clone())
            .execute(&self.pool)
            .await
            .with_context(|| format!("fail to delete {} from {collection}", key.value))?;
        Ok(())
    }
}

/// Quoted column names with the key first, and the values to bind in the same order.
fn split_columns(key: &Key, attributes: Attributes) -> (Vec<String>, Vec<String>) {
    let mut columns = vec![quote(&key.attribute)];
    let mut values = vec![key.value.clone()];
    for (name, value) in attributes {
        if name != key.attribute {
            columns.push(quote(&name));
            values.push(value);
        }
    }
    (columns, values)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// In-process store: collection name -> key value -> item.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Attributes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut BTreeMap<String, Attributes>) -> T,
    ) -> anyhow::Result<T> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(f(collections.entry(collection.to_string()).or_default()))
    }
}

impl RecordStore for MemoryStore {
    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Attributes>> {
        self.with_collection(collection, |items| items.values().cloned().collect())
    }

    async fn put(&self, collection: &str, key: &Key, mut item: Attributes) -> anyhow::Result<()> {
        item.insert(key.attribute.clone(), key.value.clone());
        self.with_collection(collection, |items| {
            items.insert(key.value.clone(), item);
        })
    }

    async fn update(&self, collection: &str, key: &Key, attributes: Attributes) -> anyhow::Result<()> {
        self.with_collection(collection, |items| {
            let item = items.entry(key.value.clone()).or_insert_with(|| {
                Attributes::from([(key.attribute.clone(), key.value.clone())])
            });
            item.extend(attributes);
        })
    }

    async fn delete(&self, collection: &str, key: &Key) -> anyhow::Result<()> {
        self.with_collection(collection, |items| {
            items.remove(&key.value);
        })
    }
}

/// A [`SqliteStore`] that is opened on first use and then shared by every request.
pub struct LazySqliteStore {
    url: String,
    client: OnceCell<SqliteStore>,
}

impl LazySqliteStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: OnceCell::new(),
        }
    }

    /// The connected store. A failed connect is not cached, the next call tries again.
    pub async fn client(&self) -> anyhow::Result<&SqliteStore> {
        self.client
            .get_or_try_init(|| async {
                tracing::info!("connecting to store at {}", self.url);
                SqliteStore::connect(&self.url).await
            })
            .await
    }
}

impl RecordStore for LazySqliteStore {
    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Attributes>> {
        self.client().await?.scan(collection).await
    }

    async fn put(&self, collection: &str, key: &Key, item: Attributes) -> anyhow::Result<()> {
        self.client().await?.put(collection, key, item).await
    }

    async fn update(&self, collection: &str, key: &Key, attributes: Attributes) -> anyhow::Result<()> {
        self.client().await?.update(collection, key, attributes).await
    }

    async fn delete(&self, collection: &str, key: &Key) -> anyhow::Result<()> {
        self.client().await?.delete(collection, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn sqlite_put_replaces_whole_item() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = Key::new("id", "1");

        store
            .put("restaurants", &key, item(&[("id", "1"), ("name", "KFC"), ("hours", "9-5")]))
            .await
            .unwrap();
        store
            .put("restaurants", &key, item(&[("name", "McDonald's")]))
            .await
            .unwrap();

        let items = store.scan("restaurants").await.unwrap();
        assert_eq!(items, vec![item(&[("id", "1"), ("name", "McDonald's")])]);
    }

    #[tokio::test]
    async fn sqlite_update_is_an_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = Key::new("id", "9");

        store
            .update("restaurants", &key, item(&[("name", "A"), ("hours", "24h")]))
            .await
            .unwrap();
        store
            .update("restaurants", &key, item(&[("name", "B")]))
            .await
            .unwrap();

        let items = store.scan("restaurants").await.unwrap();
        assert_eq!(
            items,
            vec![item(&[("id", "9"), ("name", "B"), ("hours", "24h")])]
        );
    }

    #[tokio::test]
    async fn sqlite_delete_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = Key::new("id", "42");

        store.delete("restaurants", &key).await.unwrap();
        store
            .put("restaurants", &key, item(&[("name", "gone soon")]))
            .await
            .unwrap();
        store.delete("restaurants", &key).await.unwrap();

        assert!(store.scan("restaurants").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_unknown_collection_is_an_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store.scan("dishes").await.unwrap_err();
        assert!(err.to_string().contains("fail to scan dishes"));
    }

    #[tokio::test]
    async fn memory_store_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        let key = Key::new("id", "3");

        assert!(store.scan("restaurants").await.unwrap().is_empty());
        store
            .update("restaurants", &key, item(&[("name", "A"), ("hours", "24h")]))
            .await
            .unwrap();
        store
            .put("restaurants", &key, item(&[("name", "B")]))
            .await
            .unwrap();
        assert_eq!(
            store.scan("restaurants").await.unwrap(),
            vec![item(&[("id", "3"), ("name", "B")])]
        );

        store.delete("restaurants", &key).await.unwrap();
        store.delete("restaurants", &key).await.unwrap();
        assert!(store.scan("restaurants").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lazy_store_connects_once() {
        let store = LazySqliteStore::new("sqlite::memory:");
        let first = store.client().await.unwrap() as *const SqliteStore;
        let second = store.client().await.unwrap() as *const SqliteStore;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn lazy_store_retries_after_failed_connect() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data");
        let url = format!("sqlite:{}", dir.join("restaurants.db").display());
        let store = LazySqliteStore::new(url);

        assert!(store.scan("restaurants").await.is_err());

        std::fs::create_dir(&dir).unwrap();
        assert!(store.scan("restaurants").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lazy_store_reports_bad_url() {
        let store = LazySqliteStore::new("sqlite:/no/such/dir/restaurants.db");
        assert!(store.scan("restaurants").await.is_err());
    }
}
