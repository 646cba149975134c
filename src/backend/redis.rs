//! Redis-backed heartbeat source and dump stream

use crate::common::{Error, RedisConfig, Result};
use crate::ha::dump::{DumpStream, StreamEvent};
use crate::ha::heartbeat::HeartbeatSource;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Msg};
use std::collections::HashMap;
use std::pin::Pin;

/// Subscription to the monitored source's status channel
pub struct RedisHeartbeatSource {
    channel: String,
    messages: Pin<Box<dyn Stream<Item = Msg> + Send>>,
}

impl RedisHeartbeatSource {
    pub async fn subscribe(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&config.heartbeat_channel).await?;
        tracing::info!(channel = %config.heartbeat_channel, "Subscribed to heartbeat channel");

        Ok(Self {
            channel: config.heartbeat_channel.clone(),
            messages: Box::pin(pubsub.into_on_message()),
        })
    }
}

#[async_trait]
impl HeartbeatSource for RedisHeartbeatSource {
    async fn next_payload(&mut self) -> Result<String> {
        let msg = self.messages.next().await.ok_or_else(|| {
            Error::ChannelClosed(format!("subscription to {} ended", self.channel))
        })?;
        Ok(msg.get_payload::<String>()?)
    }
}

/// Non-blocking reader of the dump progress stream
pub struct RedisDumpStream {
    key: String,
    conn: MultiplexedConnection,
}

impl RedisDumpStream {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            key: config.dump_stream.clone(),
            conn,
        })
    }
}

#[async_trait]
impl DumpStream for RedisDumpStream {
    async fn read_after(&self, last_id: &str) -> Result<Vec<StreamEvent>> {
        let mut conn = self.conn.clone();
        // XREAD without BLOCK; nil when nothing is newer than last_id.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.key.as_str()], &[last_id], &StreamReadOptions::default())
            .await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(stream_event)
            .collect()
    }
}

fn stream_event(entry: StreamId) -> Result<StreamEvent> {
    let mut fields = HashMap::with_capacity(entry.map.len());
    for (name, value) in &entry.map {
        let value: String = redis::from_redis_value(value)?;
        fields.insert(name.clone(), value);
    }
    Ok(StreamEvent {
        id: entry.id,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    #[test]
    fn test_stream_event_from_entry() {
        let mut map = HashMap::new();
        map.insert("type".to_string(), Value::BulkString(b"host".to_vec()));
        map.insert("state".to_string(), Value::BulkString(b"done".to_vec()));
        let entry = StreamId {
            id: "1700000000000-0".to_string(),
            map,
        };

        let event = stream_event(entry).unwrap();
        assert_eq!(event.id, "1700000000000-0");
        assert_eq!(event.field("type"), Some("host"));
        assert_eq!(event.field("state"), Some("done"));
    }

    #[test]
    fn test_stream_event_rejects_non_text_field() {
        let mut map = HashMap::new();
        map.insert("type".to_string(), Value::Nil);
        let entry = StreamId {
            id: "1-0".to_string(),
            map,
        };

        assert!(matches!(stream_event(entry), Err(Error::Redis(_))));
    }
}
