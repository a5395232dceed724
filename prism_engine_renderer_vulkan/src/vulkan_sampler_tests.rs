//! Unit tests for the sampler cache's shutdown contract

use super::*;
use prism_engine::prism::Error;

#[test]
fn test_sampler_request_after_shutdown_is_an_error() {
    let mut cache = SamplerCache {
        ctx: None,
        cache: HashMap::new(),
    };

    let result = cache.get(SamplerType::LinearClamp);
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}
