//! Reference identity codec.
//!
//! Returns every payload unchanged in both directions. Used by `codec-strategy
//! = "default-inline-transform"` and as the baseline for round-trip tests:
//! composing outbound-then-inbound through the identity codec must
//! reproduce the original bytes exactly.

use async_trait::async_trait;

use crate::error::Result;
use crate::payload_codec::{Direction, PayloadCodec, PayloadContext};

#[derive(Debug, Default)]
pub struct IdentityCodec;

#[async_trait]
impl PayloadCodec for IdentityCodec {
    async fn transform(&self, _direction: Direction, _ctx: &PayloadContext, bytes: Vec<u8>) -> Result<Vec<u8>> {
        Ok(bytes)
    }
}
