// packages/mesh/demos/ping_pong.rs
//! Two workers chatting over the default topic
//!
//! Starts a host on a free port and two workers, each hosting one agent that
//! republishes whatever it hears until it has seen five messages.
//!
//! ```text
//! cargo run --example ping_pong
//! ```

use anyhow::Result;
use async_trait::async_trait;
use sentra_lab_mesh::host::HostHandle;
use sentra_lab_mesh::observability::init_tracing;
use sentra_lab_mesh::runtime::{Agent, AgentType, Handles, MessageContext, WorkerHandle};
use sentra_lab_mesh::utils::config::{LoggingConfig, WorkerConfig};
use sentra_lab_mesh::{Message, TopicId};
use std::time::Duration;
use tracing::info;

#[derive(Clone, PartialEq, prost::Message)]
struct Chatter {
    #[prost(string, tag = "1")]
    content: String,
}

impl Message for Chatter {
    const TYPE_NAME: &'static str = "demo.Chatter";
}

struct Chatty {
    name: String,
    counter: u32,
}

impl Agent for Chatty {}

#[async_trait]
impl Handles<Chatter> for Chatty {
    async fn handle(&mut self, message: Chatter, ctx: &MessageContext) -> sentra_lab_mesh::Result<()> {
        self.counter += 1;
        if self.counter > 5 {
            return Ok(());
        }

        info!("{} received '{}'", self.name, message.content);
        let content = format!("{}: Hello x {}", self.name, self.counter);
        println!("{}", content);
        ctx.publish(Chatter { content }, TopicId::default_topic());
        Ok(())
    }
}

fn chatty(name: &'static str) -> AgentType<Chatty> {
    AgentType::new(name, move || Chatty {
        name: name.to_string(),
        counter: 0,
    })
    .with_default_subscription()
    .handles::<Chatter>()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&LoggingConfig {
        level: "warn".to_string(),
        ..LoggingConfig::default()
    })?;

    let host = HostHandle::bind("127.0.0.1:0");
    let addr = host.start().await?;

    let worker1 = WorkerHandle::new(WorkerConfig::for_host(addr.to_string()).with_name("worker1"));
    worker1.register(chatty("worker1"))?;
    worker1.start().await?;

    let worker2 = WorkerHandle::new(WorkerConfig::for_host(addr.to_string()).with_name("worker2"));
    worker2.register(chatty("worker2"))?;
    worker2.start().await?;

    worker1
        .publish(Chatter { content: "Hello!".to_string() }, TopicId::default_topic())
        .await?;

    // Let the agents run for a while
    tokio::time::sleep(Duration::from_secs(2)).await;

    worker1.stop().await?;
    worker2.stop().await?;
    host.stop().await?;

    println!(
        "worker1 handled {} messages, worker2 handled {}",
        worker1.stats().handled,
        worker2.stats().handled
    );
    Ok(())
}
