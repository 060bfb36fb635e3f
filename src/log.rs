use std::sync::Arc;
use tracing::Span;
use tracing_subscriber::fmt::time;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_log(verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::builder().parse_lossy(match verbose {
        true => "dkgnode=trace",
        false => "dkgnode=info",
    });

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(time::time())
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

#[derive(Clone)]
pub struct Logger {
    node: Arc<str>,
    pub span: Span,
}

impl Logger {
    /// Root span of a node, identified by its chain address.
    pub fn register_node(address: &str) -> Self {
        let span = tracing::info_span!("", node = address);
        Self {
            node: address.into(),
            span,
        }
    }

    /// Span of a single monitor or service, e.g. `membership.3`.
    pub fn new_child(&self, name: &str) -> Self {
        let span = tracing::info_span!(parent: &self.span, "", monitor = name);
        Self {
            node: Arc::clone(&self.node),
            span,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;

    #[test]
    fn simple_log() {
        // Another test may have installed the subscriber already.
        let _ = init_log(true);
        let node = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";

        let node_log = Logger::register_node(node);
        info!(parent: &node_log.span, "node");

        let pss_log = node_log.new_child("pss");
        info!(parent: &pss_log.span, "node.pss");

        let epoch_log = node_log.new_child(&format!("membership.{}", 3));
        info!(parent: &epoch_log.span, "node.membership");
        assert_eq!(epoch_log.node(), node);
    }
}
