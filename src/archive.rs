//! Boundary to a pre-indexed archive service.
//!
//! An archive answers the same [`DataRequest`] the node path filters locally, so its
//! blocks come back already filtered and projected. They only need wiring.

use crate::error::Result;
use crate::model::{Block, DataRequest, FieldSelection};
use crate::relations::wire;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveQuery {
    pub from_block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
    pub fields: FieldSelection,
    #[serde(flatten)]
    pub request: DataRequest,
}

#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Highest block the archive has indexed.
    async fn height(&self) -> Result<u64>;

    /// Blocks matching the query, starting at `from_block`. The archive may stop early;
    /// callers continue from the last returned height.
    async fn query(&self, query: &ArchiveQuery) -> Result<Vec<Block>>;
}

/// Run a query and wire every returned block.
pub async fn fetch_archive_blocks(
    client: &dyn ArchiveClient,
    query: &ArchiveQuery,
) -> Result<Vec<Block>> {
    let mut blocks = client.query(query).await?;
    for block in &mut blocks {
        wire(block);
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockHeader, Log, LogRequest, Transaction};
    use alloy_primitives::{address, B256};
    use serde_json::json;

    struct FixedArchive(Vec<Block>);

    #[async_trait]
    impl ArchiveClient for FixedArchive {
        async fn height(&self) -> Result<u64> {
            Ok(self.0.last().map_or(0, |b| b.header.height))
        }

        async fn query(&self, query: &ArchiveQuery) -> Result<Vec<Block>> {
            Ok(self
                .0
                .iter()
                .filter(|b| b.header.height >= query.from_block)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_query_wire_format() {
        let query = ArchiveQuery {
            from_block: 10,
            to_block: Some(20),
            fields: FieldSelection::default(),
            request: DataRequest {
                logs: vec![LogRequest {
                    address: Some(vec![address!("1111111111111111111111111111111111111111")]),
                    ..Default::default()
                }],
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&query).unwrap();

        assert_eq!(value["fromBlock"], json!(10));
        assert_eq!(value["toBlock"], json!(20));
        assert_eq!(
            value["logs"][0]["address"],
            json!(["0x1111111111111111111111111111111111111111"])
        );
        assert_eq!(value["logs"][0]["transaction"], json!(false));
    }

    #[smol_potat::test]
    async fn test_archive_blocks_are_wired() {
        let mut block = Block::new(BlockHeader::new(12, B256::ZERO, B256::ZERO));
        block.transactions = vec![Transaction::new(0)];
        block.logs = vec![Log::new(0, 0)];
        let archive = FixedArchive(vec![block]);

        let query = ArchiveQuery {
            from_block: 10,
            ..Default::default()
        };
        let blocks = fetch_archive_blocks(&archive, &query).await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].logs[0].transaction, Some(0));
        assert_eq!(blocks[0].transactions[0].logs, vec![0]);
    }
}
