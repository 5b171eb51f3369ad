use tracing::{debug, info};

use crate::event::EngineEvent;

pub fn consume(events: &[EngineEvent]) {
    for e in events {
        match e {
            EngineEvent::Transition {
                date,
                from,
                cause,
                to,
                price,
            } => {
                info!(%date, %price, "transition: {:?} --({:?})-> {:?}", from, cause, to);
            }
            EngineEvent::PolicyDecision {
                date,
                action,
                reason,
                price,
                ma,
            } => {
                debug!(%date, %price, %ma, "policy: {:?} ({:?})", action, reason);
            }
            EngineEvent::PeakRaised { date, peak } => {
                debug!(%date, %peak, "peak raised");
            }
            EngineEvent::Log(msg) => {
                info!("{}", msg);
            }
        }
    }
}
