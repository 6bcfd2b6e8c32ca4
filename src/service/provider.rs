//! The erased per-service payload.

use std::any::Any;

/// Capability bound for a service's payload: any `Send + 'static` state.
///
/// The scheduler never knows the concrete type; it only owns the box and
/// drops it with the service. Typed access goes through
/// [`Service::with_provider`](crate::service::Service::with_provider),
/// which downcasts.
pub trait Provider: Send + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> Provider for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        count: u32,
    }

    #[test]
    fn test_downcast_round_trip() {
        let mut boxed: Box<dyn Provider> = Box::new(Counter { count: 3 });
        let counter = boxed.as_any_mut().downcast_mut::<Counter>().unwrap();
        counter.count += 1;
        assert_eq!(boxed.as_any().downcast_ref::<Counter>().unwrap().count, 4);
    }

    #[test]
    fn test_wrong_type_downcast_fails() {
        let boxed: Box<dyn Provider> = Box::new(Counter { count: 0 });
        assert!(boxed.as_any().downcast_ref::<String>().is_none());
    }
}
