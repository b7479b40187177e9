use flow_crowd::{app, config::AppConfig};

fn main() -> anyhow::Result<()> {
    app::run(AppConfig::default())
}
