//! Redis Streams backend.

use std::time::Duration;

use redis::streams::{StreamMaxlen, StreamReadOptions};
use redis::{Commands, RedisError, Value};
use tracing::debug;

use super::{EntryId, MessageStream, StartPosition, StreamEntry, StreamError, StreamResult};

/// Timeout for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous connection to a Redis server.
pub struct RedisStream {
    connection: redis::Connection,
    url: String,
}

impl RedisStream {
    /// Connect to `host:port` and verify the server answers.
    pub fn connect(host: &str, port: u16) -> StreamResult<Self> {
        let url = format!("redis://{host}:{port}/");
        let client =
            redis::Client::open(url.as_str()).map_err(|e| StreamError::Connection(e.to_string()))?;
        let mut connection = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        let pong: String = redis::cmd("PING")
            .query(&mut connection)
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        debug!("Redis at {url} answered {pong}");

        Ok(Self { connection, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn command_error(command: &'static str, error: RedisError) -> StreamError {
    if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
        StreamError::Connection(error.to_string())
    } else {
        StreamError::Command {
            command,
            reason: error.to_string(),
        }
    }
}

fn start_id(start: StartPosition) -> &'static str {
    match start {
        StartPosition::NewOnly => "$",
        StartPosition::Beginning => "0",
    }
}

fn protocol(reason: impl Into<String>) -> StreamError {
    StreamError::Protocol(reason.into())
}

/// First entry of an XREADGROUP reply.
///
/// RESP2 shape: `[[stream, [[id, [field, value, ...]], ...]], ...]`. RESP3
/// servers send the outer level as a map. Field pairs keep their stored order.
fn first_entry(reply: Value) -> StreamResult<Option<StreamEntry>> {
    let streams: Vec<Value> = match reply {
        Value::Nil => return Ok(None),
        Value::Array(streams) => streams
            .into_iter()
            .map(|stream| match stream {
                Value::Array(pair) => match <[Value; 2]>::try_from(pair) {
                    Ok([_, entries]) => Ok(entries),
                    Err(_) => Err(protocol("stream reply is not a [name, entries] pair")),
                },
                other => Err(protocol(format!("unexpected stream reply {other:?}"))),
            })
            .collect::<StreamResult<_>>()?,
        Value::Map(streams) => streams.into_iter().map(|(_, entries)| entries).collect(),
        other => return Err(protocol(format!("unexpected XREADGROUP reply {other:?}"))),
    };

    for entries in streams {
        match entries {
            Value::Nil => continue,
            Value::Array(entries) => {
                if let Some(entry) = entries.into_iter().next() {
                    return convert_entry(entry).map(Some);
                }
            }
            other => return Err(protocol(format!("unexpected entry list {other:?}"))),
        }
    }
    Ok(None)
}

fn convert_entry(entry: Value) -> StreamResult<StreamEntry> {
    let parts = match entry {
        Value::Array(parts) => parts,
        other => return Err(protocol(format!("unexpected entry {other:?}"))),
    };
    let [id, fields] = <[Value; 2]>::try_from(parts)
        .map_err(|_| protocol("entry is not an [id, fields] pair"))?;
    let id: String =
        redis::from_redis_value(&id).map_err(|e| protocol(format!("entry id: {e}")))?;

    let Value::Array(flat) = fields else {
        return Err(protocol(format!("entry {id} has no field list")));
    };
    if flat.len() % 2 != 0 {
        return Err(protocol(format!("entry {id} has an odd field list")));
    }
    let fields = flat
        .chunks_exact(2)
        .map(|pair| {
            let key: String = redis::from_redis_value(&pair[0])
                .map_err(|e| protocol(format!("field name of {id}: {e}")))?;
            let value: Vec<u8> = redis::from_redis_value(&pair[1])
                .map_err(|e| protocol(format!("field {key} of {id}: {e}")))?;
            Ok((key, value))
        })
        .collect::<StreamResult<Vec<_>>>()?;

    Ok(StreamEntry {
        id: EntryId::new(id),
        fields,
    })
}

impl MessageStream for RedisStream {
    fn create_consumer_group(
        &mut self,
        stream: &str,
        group: &str,
        start: StartPosition,
        create_stream: bool,
    ) -> StreamResult<()> {
        let result: redis::RedisResult<()> = if create_stream {
            self.connection
                .xgroup_create_mkstream(stream, group, start_id(start))
        } else {
            self.connection.xgroup_create(stream, group, start_id(start))
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Err(StreamError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> StreamResult<Option<StreamEntry>> {
        // BLOCK 0 means no timeout.
        let block_ms = block.as_millis().max(1) as usize;
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(1)
            .block(block_ms);

        let reply: Value = self
            .connection
            .xread_options(&[stream], &[">"], &options)
            .map_err(|e| command_error("XREADGROUP", e))?;

        first_entry(reply)
    }

    fn ack(&mut self, stream: &str, group: &str, id: &EntryId) -> StreamResult<u64> {
        self.connection
            .xack(stream, group, &[id.as_str()])
            .map_err(|e| command_error("XACK", e))
    }

    fn append(
        &mut self,
        stream: &str,
        fields: &[(String, Vec<u8>)],
        approx_cap: Option<usize>,
    ) -> StreamResult<EntryId> {
        let id: String = match approx_cap {
            Some(cap) => self
                .connection
                .xadd_maxlen(stream, StreamMaxlen::Approx(cap), "*", fields),
            None => self.connection.xadd(stream, "*", fields),
        }
        .map_err(|e| command_error("XADD", e))?;

        Ok(EntryId::new(id))
    }
}
