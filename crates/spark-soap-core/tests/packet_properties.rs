//! Packet 响应派生的属性传播性质。
//!
//! # 测试目标（Why）
//! - 对任意属性集合，`create_response` 保留全部调用级属性、排除全部处理器作用域属性；
//! - 回传通道、端点模型等瞬态字段从不传播。
//!
//! # 覆盖方式（How）
//! - proptest 生成键值对与“是否处理器作用域”标记，逐键比对响应中的可见性。

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use spark_soap_core::test_stubs::RecordingBackChannel;
use spark_soap_core::{Element, Message, Packet, ServiceModel, SoapVersion};

fn properties() -> impl Strategy<Value = BTreeMap<String, (i64, bool)>> {
    prop::collection::btree_map("[a-z]{1,8}(\\.[a-z]{1,6})?", (any::<i64>(), any::<bool>()), 0..16)
}

proptest! {
    #[test]
    fn create_response_copies_exactly_the_visible_properties(props in properties()) {
        let (channel, _probe) = RecordingBackChannel::new();
        let mut request = Packet::with_message(Message::new(
            SoapVersion::Soap11,
            Element::ns("urn:p", "op", "p"),
        ));
        for (key, (value, hidden)) in &props {
            if *hidden {
                request.set_handler_scoped_property(key.clone(), *value);
            } else {
                request.set_property(key.clone(), *value);
            }
        }
        request.set_back_channel(Box::new(channel));
        request.set_endpoint(Arc::new(ServiceModel::default()));
        request.set_endpoint_address("http://example.invalid/ep");

        let response = request.create_response(None);

        for (key, (value, hidden)) in &props {
            if *hidden {
                prop_assert!(response.property(key).is_none());
            } else {
                prop_assert_eq!(response.property(key), Some(&(*value).into()));
            }
        }
        let visible = props.values().filter(|(_, hidden)| !hidden).count();
        prop_assert_eq!(response.properties().count(), visible);
        prop_assert_eq!(response.response_context().len(), visible);
        prop_assert!(response.endpoint().is_none());
        prop_assert!(response.endpoint_address().is_none());
        prop_assert!(!response.has_message());
    }

    #[test]
    fn dropped_packets_never_regain_a_message(attempts in 1usize..5) {
        let mut packet = Packet::new();
        packet.drop_message();
        for _ in 0..attempts {
            let accepted = packet.set_message(Some(Message::empty(SoapVersion::Soap12)));
            prop_assert!(!accepted);
        }
        prop_assert!(!packet.has_message());
    }
}
