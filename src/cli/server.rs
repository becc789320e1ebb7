use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, sleep};

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::CatalogOptions;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub catalog: CatalogOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 添加图片接口的鉴权 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let catalog = open_catalog(opts, Some(&self.catalog)).await?;
        catalog.reconcile().await?;

        let token = if self.token.is_empty() {
            let token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", token);
            token
        } else {
            self.token.clone()
        };

        let state = server::AppState::new(catalog, token);
        let app = server::create_app(state.clone());

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            let auth = match &self.prometheus_auth {
                Some(auth) => match auth.split_once(':') {
                    Some((username, password)) => Some((username.to_owned(), password.to_owned())),
                    None => anyhow::bail!("prometheus 认证信息格式错误，应为 username:password"),
                },
                None => None,
            };
            tokio::spawn(push_metrics(url, instance, auth));
        }

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("监听退出信号失败: {e}");
                }
            })
            .await?;

        info!("服务器关闭，保存向量索引");
        state.catalog.flush()?;
        Ok(())
    }
}

/// 每 30 秒向 pushgateway 推送一次指标
async fn push_metrics(url: String, instance: String, auth: Option<(String, String)>) {
    loop {
        let metric_families = prometheus::gather();
        let url = url.clone();
        let instance = instance.clone();
        let auth = auth.clone();
        let result = spawn_blocking(move || {
            prometheus::push_metrics(
                "imcatalog",
                labels! {
                    "instance".to_string() => instance,
                },
                &url,
                metric_families,
                auth.map(|(username, password)| BasicAuthentication { username, password }),
            )
        })
        .await;
        match result {
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => error!("推送指标失败: {e}"),
            Ok(Ok(())) => {}
        }
        sleep(Duration::from_secs(30)).await;
    }
}
