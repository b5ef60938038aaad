use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use location_backend::{
    AppState,
    config::Config,
    gateway::{broadcast, consumer, hub::ConnectionHub, vendor},
    geo::index::GeoIndex,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    presence::PresenceService,
    relay::{self, EventBus, NatsBus},
    rooms::Reconciler,
    routes,
    store::redis::RedisStore,
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置 Redis 客户端（地理索引/在线状态/房间成员共享存储）
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let store = Arc::new(RedisStore::new(Arc::new(redis_client.clone())));

    // 连接消息总线
    let bus = Arc::new(
        NatsBus::connect(&config.nats_url)
            .await
            .expect("Failed to connect to NATS"),
    );

    // 组装核心组件
    let geo = Arc::new(GeoIndex::new(
        store.clone(),
        config.store_retry_attempts,
        config.store_retry_delay(),
        config.store_timeout(),
    ));
    let presence = Arc::new(PresenceService::new(
        store.clone(),
        config.presence_ttl(),
        config.store_timeout(),
    ));
    let hub = Arc::new(ConnectionHub::new());
    let reconciler = Arc::new(Reconciler::new(
        geo.clone(),
        store.clone(),
        hub.clone(),
        bus.clone() as Arc<dyn EventBus>,
        config.max_search_radius,
        config.presence_ttl(),
    ));

    let state = AppState {
        config: config.clone(),
        geo: geo.clone(),
        presence,
        reconciler,
        hub: hub.clone(),
        bus: bus.clone() as Arc<dyn EventBus>,
    };

    // 启动位置更新工作者：共享同一 durable 拉取消费者，
    // 每条消息恰好一个工作者处理
    let worker_consumer = bus
        .worker_consumer()
        .await
        .expect("Failed to initialize relay stream");
    for worker in 0..config.relay_workers {
        tokio::spawn(relay::worker::run_worker(
            worker,
            worker_consumer.clone(),
            geo.clone(),
            bus.clone() as Arc<dyn EventBus>,
        ));
    }

    // 启动跨网关广播任务
    tokio::spawn(broadcast::run_broadcaster(bus.client(), hub.clone()));

    // 设置HTTP面限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // 连接路由（握手时在处理器内鉴权）
    let ws_routes = Router::new()
        .route("/ws/vendor", get(vendor::vendor_ws))
        .route("/ws/user", get(consumer::consumer_ws));

    // 内部RPC路由，Bearer鉴权
    let internal_routes = Router::new()
        .route(
            "/internal/vendors/location",
            post(routes::internal::update_vendor_location)
                .delete(routes::internal::remove_vendor_location),
        )
        .route(
            "/internal/vendors/nearby",
            get(routes::internal::nearby_vendors),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(ws_routes).merge(internal_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
