use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, KeyValue, Txn, TxnOp};

use super::{direct_children, dir_prefix, KvPair, KvStore, Result, StoreError, WriteOptions};

/// etcd v3 backend. etcd has no directories, so containers are derived
/// from key prefixes and `WriteOptions::is_dir` is ignored.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!("Connected to etcd at {}", endpoints.join(","));
        Ok(Self { client })
    }
}

fn backend_error(e: etcd_client::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn to_pair(kv: &KeyValue) -> KvPair {
    KvPair {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        version: kv.mod_revision() as u64,
        is_dir: false,
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    fn backend(&self) -> &'static str {
        "etcd"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let dir = dir_prefix(prefix);
        let mut client = self.client.clone();
        let resp = client
            .get(dir.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(backend_error)?;

        tracing::debug!("etcd range {} returned {} keys", dir, resp.kvs().len());
        Ok(direct_children(prefix, resp.kvs().iter().map(to_pair)))
    }

    async fn get(&self, key: &str) -> Result<KvPair> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(backend_error)?;

        resp.kvs()
            .first()
            .map(to_pair)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &[u8], _options: WriteOptions) -> Result<()> {
        let mut client = self.client.clone();
        client.put(key, value, None).await.map_err(backend_error)?;
        Ok(())
    }

    async fn put_if_version(&self, key: &str, value: &[u8], expected_version: u64) -> Result<()> {
        let txn = Txn::new()
            .when([Compare::mod_revision(
                key,
                CompareOp::Equal,
                expected_version as i64,
            )])
            .and_then([TxnOp::put(key, value, None)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await.map_err(backend_error)?;

        if resp.succeeded() {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
            })
        }
    }
}
