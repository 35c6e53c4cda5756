/**
 * HERD KERNEL - Point d'entrée du serveur de cycle de vie des hosts
 *
 * RÔLE : Charge la config, ouvre le store JSON, réhydrate le registre des
 * hosts, branche le pont MQTT (entrées agents + notifications) et démarre
 * le moniteur de perte de heartbeat.
 *
 * ARCHITECTURE : Event-driven via MQTT ; chaque host est verrouillé
 * individuellement, aucun verrou global.
 */

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use herd_kernel::config::load_config;
use herd_kernel::monitor::HeartbeatMonitor;
use herd_kernel::mqtt::{create_mqtt_client, spawn_mqtt_listener, MqttNotifier};
use herd_kernel::topology::ConfiguredTopology;
use herd_kernel::{HostContext, HostRegistry, JsonFileHostStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("herd_kernel=info")))
        .init();

    let cfg = load_config().await;
    cfg.validate().context("kernel config")?;

    let store = JsonFileHostStore::open(&cfg.store.path)
        .with_context(|| format!("opening host store {}", cfg.store.path.display()))?;

    // client MQTT partagé : entrées agents + notifications sortantes
    let (client, eventloop) = create_mqtt_client(&cfg.mqtt);
    let notifier = Arc::new(MqttNotifier::new(client.clone()));
    let topology = Arc::new(ConfiguredTopology::new(cfg.clusters.clone()));

    let ctx = HostContext::new(Arc::new(store))
        .with_sink(notifier.clone())
        .with_publisher(notifier)
        .with_membership(topology.clone())
        .with_config_lookup(topology);

    let registry = Arc::new(HostRegistry::new(ctx));
    let loaded = registry.load_from_store().context("loading hosts")?;
    info!(hosts = loaded, clusters = cfg.clusters.len(), "host registry ready");

    let listener = spawn_mqtt_listener(client, eventloop, registry.clone());
    let monitor = HeartbeatMonitor::new(registry, cfg.heartbeat.timeout()).spawn(cfg.heartbeat.check_interval());

    info!(broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port), "herd kernel running");

    tokio::select! {
        res = listener => res.context("MQTT listener stopped")?,
        res = monitor => res.context("heartbeat monitor stopped")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }
    Ok(())
}
