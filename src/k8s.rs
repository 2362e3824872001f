//! Kubernetes control-plane operations issued through the control node.

pub mod kubectl;
