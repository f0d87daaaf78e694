/// Decides which completed requests enter the audit trail.
///
/// Errors are always kept. Successes are kept with probability
/// `sample_rate`, decided by hashing the trace id so the same request
/// gets the same answer everywhere. Excluded paths are never kept.
#[derive(Debug, Clone)]
pub struct AuditSampler {
    sample_rate: f64,
    exclude_paths: Vec<String>,
}

impl AuditSampler {
    pub fn new(sample_rate: f64, exclude_paths: Vec<String>) -> Self {
        Self {
            sample_rate: sample_rate.clamp(0.0, 1.0),
            exclude_paths,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// `"/metrics"` excludes `/metrics` and `/metrics/...` but not
    /// `/metricsfoo`.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|excl| {
            path == excl
                || path
                    .strip_prefix(excl.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn should_record(&self, path: &str, status: u16, trace_id: &str) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        if status >= 400 || self.sample_rate >= 1.0 {
            return true;
        }
        if self.sample_rate <= 0.0 {
            return false;
        }
        unit_hash(trace_id) < self.sample_rate
    }
}

impl Default for AuditSampler {
    fn default() -> Self {
        Self::new(1.0, Vec::new())
    }
}

/// FNV-1a with a murmur3 finalizer, mapped onto [0, 1).
#[allow(clippy::cast_precision_loss)]
fn unit_hash(value: &str) -> f64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in value.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^= hash >> 33;
    (hash >> 11) as f64 / (1u64 << 53) as f64
}
