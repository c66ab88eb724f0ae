//! Several observers sharing one broker connection.
//!
//! Needs an MQTT broker on `localhost:1883`:
//!
//! ```bash
//! docker run -p 1883:1883 eclipse-mosquitto:2 mosquitto -c /mosquitto-no-auth.conf
//! RUST_LOG=mqtt_multiplexer=debug cargo run --example shared_observers
//! ```

use std::time::Duration;

use mqtt_multiplexer::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn setup_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| "info".into());
	tracing_subscriber::registry()
		.with(filter)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.compact(),
		)
		.init();
}

#[tokio::main]
async fn main() -> Result<()> {
	setup_tracing();

	let config = ServiceConfig {
		protocol: "mqtt".to_string(),
		..ServiceConfig::new("localhost", 1883)
	};
	let service = MqttService::new(config)?;
	println!("client id: {}", service.client_id());

	let mut state = service.state();
	while *state.borrow_and_update() != ConnectionState::Connected {
		if state.changed().await.is_err() {
			return Ok(());
		}
	}

	// two observers of the same filter share one network subscription
	let mut dashboard = service
		.observe("demo/sensors/+", SubscribeOptions::default())
		.await?;
	let mut logger = service
		.observe("demo/sensors/+", SubscribeOptions::default())
		.await?;
	let mut everything = service
		.observe_retained("demo/#", SubscribeOptions::qos(QoS::AtMostOnce))
		.await?;

	for subscription in service.subscriptions().await? {
		println!(
			"{} qos={:?} observers={}",
			subscription.filter, subscription.qos, subscription.refcount
		);
	}

	tokio::time::sleep(Duration::from_millis(200)).await;
	for (room, value) in [("kitchen", "21.5"), ("hall", "19.0")] {
		service
			.publish(
				&format!("demo/sensors/{room}"),
				value,
				PublishOptions::default().with_qos(QoS::AtLeastOnce),
			)
			.await?;
	}

	for _ in 0 .. 2 {
		if let Some(Ok(message)) = dashboard.recv().await {
			println!("dashboard <- {}", message.topic);
		}
		if let Some(Ok(message)) = logger.recv().await {
			println!("logger    <- {}", message.topic);
		}
		if let Some(Ok(message)) = everything.recv().await {
			println!("everything <- {}", message.topic);
		}
	}

	// a late retained observer starts with the last message
	let mut late = service
		.observe_retained("demo/#", SubscribeOptions::default())
		.await?;
	if let Some(Ok(message)) = late.recv().await {
		println!("late      <- {} (replayed)", message.topic);
	}

	dashboard.release().await?;
	logger.release().await?;
	everything.release().await?;
	late.release().await?;
	service.disconnect(false).await?;
	Ok(())
}
