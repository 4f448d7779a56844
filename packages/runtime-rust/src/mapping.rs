//! Header projection of call-context fields.
//!
//! [`HeaderProjection`] is the stock [`HeaderMapper`]: it writes the
//! correlation fields of a [`CallContext`] into `conduit-*` message headers on
//! the way out and reads them back on the way in.

use conduit_core::{BusResult, CallContext, NormalizedMessage, QName};

use crate::traits::HeaderMapper;

pub const MESSAGE_ID: &str = "conduit-message-id";
pub const CORRELATION_ID: &str = "conduit-correlation-id";
pub const PROVIDER_ID: &str = "conduit-provider-id";
pub const SERVICE: &str = "conduit-service";
pub const OPERATION: &str = "conduit-operation";
pub const PARTNER_OPERATION: &str = "conduit-partner-operation";
pub const ACTION: &str = "conduit-action";

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderProjection;

impl HeaderProjection {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn write_common(ctx: &CallContext, msg: &mut NormalizedMessage) {
        let headers = &mut msg.headers;
        headers.insert(MESSAGE_ID.to_string(), ctx.message_id.clone());
        headers.insert(CORRELATION_ID.to_string(), ctx.correlation_id.clone());
        let optional = [
            (PROVIDER_ID, ctx.provider_id.clone()),
            (SERVICE, ctx.service.as_ref().map(QName::to_string)),
            (OPERATION, ctx.operation.clone()),
            (ACTION, ctx.action.clone()),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                headers.insert(name.to_string(), value);
            }
        }
    }

    fn read_common(msg: &NormalizedMessage, ctx: &mut CallContext) {
        if let Some(id) = msg.header(MESSAGE_ID) {
            ctx.message_id = id.to_string();
        }
        if let Some(id) = msg.header(CORRELATION_ID) {
            ctx.correlation_id = id.to_string();
        }
        if ctx.action.is_none() {
            ctx.action = msg.header(ACTION).map(str::to_string);
        }
    }
}

impl HeaderMapper for HeaderProjection {
    fn map_outgoing_request(&self, ctx: &CallContext, msg: &mut NormalizedMessage) -> BusResult<()> {
        Self::write_common(ctx, msg);
        Ok(())
    }

    fn map_outgoing_response(&self, ctx: &CallContext, msg: &mut NormalizedMessage) -> BusResult<()> {
        Self::write_common(ctx, msg);
        if let Some(partner) = &ctx.partner_operation {
            msg.headers
                .insert(PARTNER_OPERATION.to_string(), partner.clone());
        }
        Ok(())
    }

    fn map_incoming_request(&self, msg: &NormalizedMessage, ctx: &mut CallContext) -> BusResult<()> {
        Self::read_common(msg, ctx);
        if ctx.service.is_none() {
            ctx.service = msg.header(SERVICE).map(QName::parse).transpose()?;
        }
        Ok(())
    }

    fn map_incoming_response(&self, msg: &NormalizedMessage, ctx: &mut CallContext) -> BusResult<()> {
        Self::read_common(msg, ctx);
        if let Some(partner) = msg.header(PARTNER_OPERATION) {
            ctx.partner_operation = Some(partner.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::{Content, ErrorKind};

    use super::*;

    fn context() -> CallContext {
        let mut ctx = CallContext::new("msg-1", "corr-1");
        ctx.provider_id = Some("node-a".into());
        ctx.service = Some(QName::new("urn:acme", "Billing"));
        ctx.operation = Some("pay".into());
        ctx.action = Some("urn:acme:pay".into());
        ctx
    }

    fn empty_message() -> NormalizedMessage {
        NormalizedMessage::new(Content::Tree(serde_json::json!({})))
    }

    #[test]
    fn outgoing_request_writes_correlation_headers() {
        let mut msg = empty_message();
        HeaderProjection
            .map_outgoing_request(&context(), &mut msg)
            .unwrap();
        assert_eq!(msg.header(MESSAGE_ID), Some("msg-1"));
        assert_eq!(msg.header(CORRELATION_ID), Some("corr-1"));
        assert_eq!(msg.header(SERVICE), Some("{urn:acme}Billing"));
        assert_eq!(msg.header(ACTION), Some("urn:acme:pay"));
        assert_eq!(msg.header(PARTNER_OPERATION), None);
    }

    #[test]
    fn incoming_request_restores_correlation() {
        let mut msg = empty_message();
        HeaderProjection
            .map_outgoing_request(&context(), &mut msg)
            .unwrap();

        let mut received = CallContext::new("local", "local");
        HeaderProjection
            .map_incoming_request(&msg, &mut received)
            .unwrap();
        assert_eq!(received.message_id, "msg-1");
        assert_eq!(received.correlation_id, "corr-1");
        assert_eq!(received.service, Some(QName::new("urn:acme", "Billing")));
        assert_eq!(received.action.as_deref(), Some("urn:acme:pay"));
    }

    #[test]
    fn response_carries_partner_operation() {
        let mut ctx = context();
        ctx.partner_operation = Some("payCallback".into());
        let mut msg = empty_message();
        HeaderProjection.map_outgoing_response(&ctx, &mut msg).unwrap();

        let mut received = CallContext::new("x", "y");
        HeaderProjection
            .map_incoming_response(&msg, &mut received)
            .unwrap();
        assert_eq!(received.partner_operation.as_deref(), Some("payCallback"));
        assert_eq!(received.correlation_id, "corr-1");
    }

    #[test]
    fn malformed_service_header_is_illegal_input() {
        let mut msg = empty_message();
        msg.headers.insert(SERVICE.to_string(), "{urn:acme".to_string());
        let err = HeaderProjection
            .map_incoming_request(&msg, &mut CallContext::new("a", "b"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalInput);
    }
}
