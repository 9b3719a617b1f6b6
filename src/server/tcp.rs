//! Line-oriented TCP surface.
//!
//! Newline-delimited ASCII commands against the local node only: nothing on
//! this surface forwards to owners or replicates. `AUTH` pins a tenant to
//! the connection so later commands can omit it. Every reply is a single
//! line: `OK`, `PONG`, `VALUE <v>`, `KEYS k1,k2`, or `ERR <msg>`.

use crate::cache::errors::CacheError;
use crate::cache::registry::TenantRegistry;
use crate::cache::store::now_nanos;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

pub async fn accept_loop(
    listener: TcpListener,
    registry: Arc<TenantRegistry>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => {
                tracing::debug!("TCP accept loop stopping");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("TCP connection from {}", peer);
                    let registry = registry.clone();
                    let stop = stop.clone();
                    tokio::spawn(handle_conn(stream, registry, stop));
                }
                Err(e) => {
                    tracing::warn!("TCP accept error: {}", e);
                }
            }
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

async fn handle_conn(
    stream: TcpStream,
    registry: Arc<TenantRegistry>,
    mut stop: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut auth_tenant: Option<String> = None;

    loop {
        let line = tokio::select! {
            _ = stop.changed() => {
                let _ = write_line(&mut write_half, "ERR server shutting down").await;
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!("TCP read error: {}", e);
                    return;
                }
            }
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let (reply, close) = execute_command(&registry, &mut auth_tenant, &tokens);
        if write_line(&mut write_half, &reply).await.is_err() {
            return;
        }
        if close {
            return;
        }
    }
}

/// Runs one command against the local registry. Returns the reply line and
/// whether the connection should close afterwards.
pub fn execute_command(
    registry: &TenantRegistry,
    auth_tenant: &mut Option<String>,
    tokens: &[&str],
) -> (String, bool) {
    let command = tokens[0].to_ascii_uppercase();

    match command.as_str() {
        "AUTH" => {
            if tokens.len() != 2 {
                return err("usage: AUTH <userID>");
            }
            *auth_tenant = Some(tokens[1].to_string());
            ok()
        }

        "PING" => ("PONG".to_string(), false),

        "QUIT" => ("BYE".to_string(), true),

        "CREATEUSER" => {
            if tokens.len() != 2 {
                return err("usage: CREATEUSER <userID>");
            }
            match registry.create(tokens[1]) {
                Ok(()) => ok(),
                Err(CacheError::TenantExists) => err("user exists"),
                Err(_) => err("internal"),
            }
        }

        "DELETEUSER" => {
            if tokens.len() != 2 {
                return err("usage: DELETEUSER <userID>");
            }
            match registry.delete(tokens[1]) {
                Ok(()) => ok(),
                Err(CacheError::TenantNotFound) => err("user not found"),
                Err(_) => err("internal"),
            }
        }

        "SET" => {
            // SET <key> <value> [ttl] with AUTH, SET <user> <key> <value> [ttl] without.
            let (tenant, key, value, ttl_token) = match auth_tenant {
                Some(tenant) => {
                    if tokens.len() < 3 {
                        return err("usage: SET <key> <value> [ttl]");
                    }
                    (tenant.clone(), tokens[1], tokens[2], tokens.get(3))
                }
                None => {
                    if tokens.len() < 4 {
                        return err("usage: SET <user> <key> <value> [ttl]");
                    }
                    (tokens[1].to_string(), tokens[2], tokens[3], tokens.get(4))
                }
            };
            let ttl_secs: i64 = ttl_token.and_then(|t| t.parse().ok()).unwrap_or(0);
            let ttl = if ttl_secs > 0 {
                Some(Duration::from_secs(ttl_secs as u64))
            } else {
                None
            };

            match registry.set(&tenant, key, value.as_bytes(), ttl, now_nanos()) {
                Ok(()) => ok(),
                Err(CacheError::TenantNotFound) => err("user not found"),
                Err(_) => err("internal"),
            }
        }

        "GET" => {
            let (tenant, key) = match auth_tenant {
                Some(tenant) => {
                    if tokens.len() != 2 {
                        return err("usage: GET <key>");
                    }
                    (tenant.clone(), tokens[1])
                }
                None => {
                    if tokens.len() != 3 {
                        return err("usage: GET <user> <key>");
                    }
                    (tokens[1].to_string(), tokens[2])
                }
            };
            match registry.get(&tenant, key) {
                Ok(value) => (
                    format!("VALUE {}", String::from_utf8_lossy(&value)),
                    false,
                ),
                Err(CacheError::TenantNotFound) => err("user not found"),
                Err(CacheError::KeyNotFound) => err("key not found"),
                Err(_) => err("internal"),
            }
        }

        "DELETE" => {
            let (tenant, key) = match auth_tenant {
                Some(tenant) => {
                    if tokens.len() != 2 {
                        return err("usage: DELETE <key>");
                    }
                    (tenant.clone(), tokens[1])
                }
                None => {
                    if tokens.len() != 3 {
                        return err("usage: DELETE <user> <key>");
                    }
                    (tokens[1].to_string(), tokens[2])
                }
            };
            match registry.delete_key(&tenant, key) {
                Ok(()) => ok(),
                Err(CacheError::TenantNotFound) => err("user not found"),
                Err(_) => err("internal"),
            }
        }

        "KEYS" => {
            let tenant = match auth_tenant {
                Some(tenant) => tenant.clone(),
                None => {
                    if tokens.len() != 2 {
                        return err("usage: KEYS <user>");
                    }
                    tokens[1].to_string()
                }
            };
            match registry.keys(&tenant) {
                Ok(keys) => (format!("KEYS {}", keys.join(",")), false),
                Err(CacheError::TenantNotFound) => err("user not found"),
                Err(_) => err("internal"),
            }
        }

        "SNAPSHOT" => {
            let tenant = match (auth_tenant.as_ref(), tokens.len()) {
                (Some(tenant), 1) => tenant.clone(),
                (_, 2) => tokens[1].to_string(),
                _ => return err("usage: SNAPSHOT <user>"),
            };
            let snap = match registry.snapshot(&tenant) {
                Ok(snap) => snap,
                Err(CacheError::TenantNotFound) => return err("user not found"),
                Err(_) => return err("internal"),
            };
            match registry.save(&snap) {
                Ok(_) => ok(),
                Err(_) => err("save failed"),
            }
        }

        "RESTORE" => {
            let tenant = match (auth_tenant.as_ref(), tokens.len()) {
                (Some(tenant), 1) => tenant.clone(),
                (_, 2) => tokens[1].to_string(),
                _ => return err("usage: RESTORE <user>"),
            };
            match registry.load(&tenant) {
                Ok(snap) => {
                    registry.restore(snap);
                    ok()
                }
                Err(_) => err("snapshot not found"),
            }
        }

        _ => err("unknown command"),
    }
}

fn ok() -> (String, bool) {
    ("OK".to_string(), false)
}

fn err(msg: &str) -> (String, bool) {
    (format!("ERR {}", msg), false)
}
