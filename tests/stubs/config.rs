use std::sync::Arc;

use fleet_poller::node_mgmt::config::SharedDescriptor;
use fleet_poller::node_mgmt::DeviceDescriptor;
use serde_json::json;

pub const VALID_CONFIG: &str = r#"
{
    "category": "PCS",
    "schedule": {
        "intervalSecs": 60,
        "startupDelaySecs": 5,
        "roundTimeoutSecs": 50,
        "alignToInterval": true
    },
    "devMode": true,
    "devices": [
        {
            "id": "IVT_001",
            "name": "Inverter 1",
            "category": "inverter",
            "logOptions": {"receiveData": false},
            "controlPolicy": {"errorHandling": true, "reconnectOnDisconnect": false},
            "protocol": {"category": "ess", "subCategory": "das_pv_led", "deviceId": "001"},
            "connection": {"type": "serial", "port": "COM8", "baudRate": 9600}
        },
        {
            "id": "IVT_002",
            "name": "Inverter 2",
            "category": "inverter",
            "protocol": {
                "category": "ess",
                "subCategory": "das_pv_led",
                "deviceId": "002",
                "options": {"schema": ["pvKw", "operMode"]}
            },
            "connection": {"type": "socket", "address": "10.0.0.12", "port": 9000}
        }
    ],
    "refinedFields": [
        {"from": "pvKw", "to": "in_kw", "scale": 1, "decimals": 3},
        {"from": "operMode", "to": "operation_mode"}
    ]
}
"#;

// Connection has no type tag
pub const BAD_CONFIG: &str = r#"
{
    "devices": [
        {"id": "IVT_001", "protocol": {"category": "ess"}, "connection": {"port": 9000}}
    ]
}
"#;

pub fn descriptor(id: &str) -> SharedDescriptor {
    let descriptor: DeviceDescriptor = serde_json::from_value(json!({
        "id": id,
        "name": format!("Inverter {id}"),
        "category": "inverter",
        "protocol": {"category": "ess", "deviceId": id},
        "connection": {"type": "socket", "port": 9000}
    }))
    .unwrap();
    Arc::new(descriptor)
}

pub fn descriptors(ids: &[&str]) -> Vec<SharedDescriptor> {
    ids.iter().map(|id| descriptor(id)).collect()
}
