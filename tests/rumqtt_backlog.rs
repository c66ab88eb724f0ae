//! Requests issued while the rumqttc event loop cannot reach a broker.

mod common;

use std::time::Duration;

use common::init_tracing;
use mqtt_multiplexer::{
	ClientSettings, ConnectOverrides, MqttService, ServiceConfig,
	SubscribeOptions,
};

fn unreachable_broker() -> ServiceConfig {
	ServiceConfig {
		protocol: "mqtt".to_string(),
		reconnect_period_millis: 60_000,
		..ServiceConfig::new("127.0.0.1", 1).manual()
	}
}

#[tokio::test]
async fn test_observe_beyond_request_capacity_while_unreachable() {
	init_tracing();
	let settings = ClientSettings {
		event_loop_capacity: 2,
		..ClientSettings::default()
	};
	let service =
		MqttService::with_settings(unreachable_broker(), settings).unwrap();
	let mut errors = service.on_error();
	service
		.connect(ConnectOverrides::default(), None)
		.await
		.unwrap();

	// the event loop is now waiting before its next attempt and drains nothing
	tokio::time::timeout(Duration::from_secs(5), errors.recv())
		.await
		.expect("connection attempt should fail")
		.unwrap();

	let mut observers = Vec::new();
	for index in 0 .. 15 {
		let filter = format!("sensors/{index}/#");
		let observer = service
			.observe(&filter, SubscribeOptions::default())
			.await
			.unwrap_or_else(|err| panic!("observe {filter} failed: {err}"));
		observers.push(observer);
	}

	let subscriptions = service.subscriptions().await.unwrap();
	assert_eq!(subscriptions.len(), 15);
	assert!(subscriptions.iter().all(|info| info.refcount == 1));

	for observer in observers {
		observer.release().await.unwrap();
	}
	assert!(service.subscriptions().await.unwrap().is_empty());
}
