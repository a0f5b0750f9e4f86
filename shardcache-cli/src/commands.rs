use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use shardcache::{ClusterClient, SetEntry};
use std::time::Instant;

/// Executes one textual command against a cluster client
pub struct CommandRunner {
    client: ClusterClient,
}

fn quoted(value: &[u8]) -> String {
    format!("\"{}\"", String::from_utf8_lossy(value))
}

fn optional(value: Option<Vec<u8>>) -> String {
    value.map_or_else(|| "(nil)".to_string(), |v| quoted(&v))
}

fn numbered<I: IntoIterator<Item = String>>(lines: I) -> String {
    let lines: Vec<String> = lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| format!("{}) {}", i + 1, line))
        .collect();
    if lines.is_empty() {
        "(empty list)".to_string()
    } else {
        lines.join("\n")
    }
}

fn integer(n: i64) -> String {
    format!("(integer) {}", n)
}

fn failed_keys(failed: &[String]) -> String {
    if failed.is_empty() {
        String::new()
    } else {
        format!("\n{} {}", "failed:".yellow(), failed.join(", "))
    }
}

impl CommandRunner {
    pub fn new(client: ClusterClient) -> Self {
        Self { client }
    }

    /// Run a command and return its formatted output with timing
    pub async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();
        let response = self.dispatch(command, args).await?;
        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    pub async fn dispatch(&self, command: &str, args: &[String]) -> Result<String> {
        match command.to_uppercase().as_str() {
            "GET" => self.cmd_get(args).await,
            "SET" => self.cmd_set(args).await,
            "DEL" | "DELETE" => self.cmd_del(args).await,
            "EXISTS" => self.cmd_exists(args).await,
            "TTL" => self.cmd_ttl(args).await,
            "EXPIRE" => self.cmd_expire(args).await,
            "MGET" => self.cmd_mget(args).await,
            "MSET" => self.cmd_mset(args).await,
            "HGET" => self.cmd_hget(args).await,
            "HSET" => self.cmd_hset(args).await,
            "HGETALL" => self.cmd_hgetall(args).await,
            "LPUSH" => self.cmd_lpush(args).await,
            "RPOP" => self.cmd_rpop(args).await,
            "LRANGE" => self.cmd_lrange(args).await,
            "PUBLISH" => self.cmd_publish(args).await,
            "PING" => Ok(self.client.ping().await?),
            "INFO" | "CLUSTER" => self.cmd_info().await,
            "METRICS" => Ok(self.client.get_metrics()),
            "SLOT" => self.cmd_slot(args),
            "HELP" => Ok(help_text()),
            _ => Err(anyhow!("Unknown command: {}", command)),
        }
    }

    async fn cmd_get(&self, args: &[String]) -> Result<String> {
        let [key] = args else {
            bail!("Usage: GET key");
        };
        Ok(optional(self.client.get(key).await?))
    }

    async fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 2 || args.len() > 3 {
            bail!("Usage: SET key value [ttl]");
        }
        let ttl = args
            .get(2)
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("ttl must be a number of seconds")?;
        self.client.set(&args[0], &args[1], ttl).await?;
        Ok("OK".green().to_string())
    }

    async fn cmd_del(&self, args: &[String]) -> Result<String> {
        match args {
            [] => bail!("Usage: DEL key [key ...]"),
            [key] => Ok(integer(i64::from(self.client.delete(key).await?))),
            keys => {
                let result = self.client.mdelete(keys).await?;
                Ok(format!(
                    "{}{}",
                    integer(result.deleted as i64),
                    failed_keys(&result.failed)
                ))
            }
        }
    }

    async fn cmd_exists(&self, args: &[String]) -> Result<String> {
        let [key] = args else {
            bail!("Usage: EXISTS key");
        };
        Ok(integer(i64::from(self.client.exists(key).await?)))
    }

    async fn cmd_ttl(&self, args: &[String]) -> Result<String> {
        let [key] = args else {
            bail!("Usage: TTL key");
        };
        Ok(integer(self.client.ttl(key).await?))
    }

    async fn cmd_expire(&self, args: &[String]) -> Result<String> {
        let [key, seconds] = args else {
            bail!("Usage: EXPIRE key seconds");
        };
        let seconds = seconds
            .parse::<u64>()
            .context("seconds must be a non-negative number")?;
        Ok(integer(i64::from(self.client.expire(key, seconds).await?)))
    }

    async fn cmd_mget(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            bail!("Usage: MGET key [key ...]");
        }
        let result = self.client.mget(args).await?;
        let lines = args.iter().map(|key| {
            result
                .get(key)
                .map_or_else(|| "(nil)".to_string(), quoted)
        });
        Ok(format!("{}{}", numbered(lines), failed_keys(&result.failed)))
    }

    async fn cmd_mset(&self, args: &[String]) -> Result<String> {
        if args.is_empty() || args.len() % 2 != 0 {
            bail!("Usage: MSET key value [key value ...]");
        }
        let entries = args
            .chunks(2)
            .map(|pair| SetEntry::new(pair[0].clone(), pair[1].clone()))
            .collect();
        let result = self.client.mset(entries).await?;
        if result.is_complete() {
            Ok("OK".green().to_string())
        } else {
            Ok(format!(
                "stored {}{}",
                result.stored.len(),
                failed_keys(&result.failed)
            ))
        }
    }

    async fn cmd_hget(&self, args: &[String]) -> Result<String> {
        let [key, field] = args else {
            bail!("Usage: HGET key field");
        };
        Ok(optional(self.client.hget(key, field).await?))
    }

    async fn cmd_hset(&self, args: &[String]) -> Result<String> {
        let [key, field, value] = args else {
            bail!("Usage: HSET key field value");
        };
        Ok(integer(i64::from(self.client.hset(key, field, value).await?)))
    }

    async fn cmd_hgetall(&self, args: &[String]) -> Result<String> {
        let [key] = args else {
            bail!("Usage: HGETALL key");
        };
        let mut fields: Vec<_> = self.client.hgetall(key).await?.into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(numbered(
            fields
                .into_iter()
                .flat_map(|(field, value)| [format!("\"{}\"", field), quoted(&value)]),
        ))
    }

    async fn cmd_lpush(&self, args: &[String]) -> Result<String> {
        let [key, values @ ..] = args else {
            bail!("Usage: LPUSH key value [value ...]");
        };
        if values.is_empty() {
            bail!("Usage: LPUSH key value [value ...]");
        }
        Ok(integer(self.client.lpush(key, values).await?))
    }

    async fn cmd_rpop(&self, args: &[String]) -> Result<String> {
        let [key] = args else {
            bail!("Usage: RPOP key");
        };
        Ok(optional(self.client.rpop(key).await?))
    }

    async fn cmd_lrange(&self, args: &[String]) -> Result<String> {
        let [key, start, stop] = args else {
            bail!("Usage: LRANGE key start stop");
        };
        let start = start.parse::<i64>().context("start must be an integer")?;
        let stop = stop.parse::<i64>().context("stop must be an integer")?;
        let values = self.client.lrange(key, start, stop).await?;
        Ok(numbered(values.iter().map(|v| quoted(v))))
    }

    async fn cmd_publish(&self, args: &[String]) -> Result<String> {
        let [channel, message] = args else {
            bail!("Usage: PUBLISH channel message");
        };
        Ok(integer(self.client.publish(channel, message).await?))
    }

    async fn cmd_info(&self) -> Result<String> {
        let info = self.client.get_cluster_info().await?;
        let mut output = serde_json::to_string_pretty(&info)?;
        output.push_str(&format!(
            "\ncircuit_breaker: {}",
            self.client.circuit_state().as_str()
        ));
        Ok(output)
    }

    fn cmd_slot(&self, args: &[String]) -> Result<String> {
        let [key] = args else {
            bail!("Usage: SLOT key");
        };
        let stored = format!("{}{}", self.client.config().key_prefix, key);
        Ok(integer(i64::from(shardcache::compute_slot(&stored))))
    }
}

pub fn help_text() -> String {
    format!(
        r#"{}

{}
  SET key value [ttl]        Set key to hold value with optional TTL
  GET key                    Get the value of key
  DEL key [key ...]          Delete one or more keys
  EXISTS key                 Check if key exists
  EXPIRE key seconds         Set timeout on key
  TTL key                    Get remaining time to live

{}
  MSET k1 v1 [k2 v2 ...]     Set multiple keys across shards
  MGET key [key ...]         Get values of multiple keys

{}
  HSET key field value       Set a hash field
  HGET key field             Get a hash field
  HGETALL key                Get all fields of a hash
  LPUSH key value [...]      Push values onto a list head
  RPOP key                   Pop a value from a list tail
  LRANGE key start stop      Get a range of list elements
  PUBLISH channel message    Publish a message

{}
  INFO                       Cluster state and circuit breaker
  METRICS                    Prometheus metrics of this session
  SLOT key                   Hash slot a key routes to
  PING                       Ping the cluster
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
        "Shardcache CLI - Available Commands".bold().cyan(),
        "Basic Commands:".bold(),
        "Batch Commands:".bold(),
        "Data Structures:".bold(),
        "Cluster Commands:".bold(),
    )
}
