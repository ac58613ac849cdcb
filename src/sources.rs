//! Builds the live connectors and the optional narrative client.

use std::sync::Arc;
use std::time::Duration;

use common::{EngineConfig, Error, NarrativeGenerator, SourceConnector};
use llm_client::LlmClient;
use noaa_client::{NoaaClient, NoaaForecastConnector, NwsAlertsConnector, RateLimiter};
use open_meteo_client::{OpenMeteoClient, OpenMeteoConnector};
use snotel_client::{SnotelClient, SnotelConnector};
use tracing::info;

/// One connector per enabled source. NWS forecast and alerts share a client
/// and therefore one rate limiter.
pub fn build_connectors(config: &EngineConfig) -> Result<Vec<Arc<dyn SourceConnector>>, Error> {
    let sources = &config.sources;
    let timeout = Duration::from_secs(sources.connector_timeout_secs);
    let mut connectors: Vec<Arc<dyn SourceConnector>> = Vec::new();

    if sources.snotel_enabled {
        let client = SnotelClient::new(&sources.user_agent, timeout)?;
        connectors.push(Arc::new(SnotelConnector::new(client, timeout)));
    }

    if sources.noaa_enabled || sources.alerts_enabled {
        let limiter = RateLimiter::per_second(sources.noaa_requests_per_sec);
        let noaa = NoaaClient::new(&sources.user_agent, limiter, timeout)?;
        if sources.noaa_enabled {
            connectors.push(Arc::new(NoaaForecastConnector::new(noaa.clone(), timeout)));
        }
        if sources.alerts_enabled {
            connectors.push(Arc::new(NwsAlertsConnector::new(noaa, timeout)));
        }
    }

    if sources.open_meteo_enabled {
        let client = OpenMeteoClient::new(&sources.user_agent, timeout)?;
        connectors.push(Arc::new(OpenMeteoConnector::new(client, timeout)));
    }

    info!(
        "Connectors: {:?}",
        connectors.iter().map(|c| c.source().label()).collect::<Vec<_>>()
    );
    Ok(connectors)
}

/// The arrival advisor's text generator, when an API key is configured.
pub fn build_narrator(config: &EngineConfig) -> Result<Option<Arc<dyn NarrativeGenerator>>, Error> {
    Ok(LlmClient::from_config(&config.llm)?.map(|c| Arc::new(c) as Arc<dyn NarrativeGenerator>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Source;

    #[test]
    fn test_disabled_sources_are_skipped() {
        let mut config = EngineConfig::default();
        config.sources.alerts_enabled = false;
        config.sources.snotel_enabled = false;

        let connectors = build_connectors(&config).expect("connectors");
        let sources: Vec<Source> = connectors.iter().map(|c| c.source()).collect();
        assert_eq!(sources, vec![Source::Noaa, Source::OpenMeteo]);
    }

    #[test]
    fn test_no_narrator_without_key() {
        let config = EngineConfig::default();
        assert!(build_narrator(&config).expect("builds").is_none());
    }
}
