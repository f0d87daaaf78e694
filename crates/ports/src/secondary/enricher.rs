use domain::ingest::entity::CanonicalFlow;

/// Synchronous lookup that annotates a flow in place (geo, ASN, threat
/// tags). Returns the number of annotations added.
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    fn enrich(&self, flow: &mut CanonicalFlow) -> usize;
}
