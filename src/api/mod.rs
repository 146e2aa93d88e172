//! Custom resources served by the OpenStack infrastructure provider.

pub mod v1beta1;
