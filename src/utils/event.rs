use std::collections::VecDeque;

// -------------------------------------------------------------------------------------------------

/// A sample time tagged event.
pub(crate) trait Event {
    fn sample_time(&self) -> u64;
}

// -------------------------------------------------------------------------------------------------

/// Manage processing of sample time tagged events in e.g. [`Source`](crate::source::Source)s.
///
/// Note: When adding events via `insert_event`, events will be sorted ascending by time, which
/// is necessary for the ordered event processing. If events are added in other ways, ensure
/// that the sorting doesn't get broken!
pub(crate) trait EventProcessor {
    /// The sample time tagged event.
    type Event: Event;

    /// Determine in how many sample times the next event is due.
    fn time_until_next_event(&self, current_time: u64) -> usize {
        self.events().front().map_or(usize::MAX, |e| {
            e.sample_time().saturating_sub(current_time) as usize
        })
    }

    /// Add a new event for processing while keeping event list sorted by ascending sample time.
    /// Events with equal times keep their insertion order.
    fn insert_event(&mut self, event: Self::Event) {
        let events = self.events_mut();
        let sample_time = event.sample_time();
        let insert_pos = events
            .make_contiguous()
            .partition_point(|e| e.sample_time() <= sample_time);
        events.insert(insert_pos, event);
    }

    /// Process all pending events that are due up to the given time.
    fn process_events(&mut self, current_time: u64) {
        while self
            .events()
            .front()
            .is_some_and(|e| e.sample_time() <= current_time)
        {
            if let Some(event) = self.events_mut().pop_front() {
                self.process_event(event);
            }
        }
    }

    /// Access to the event deque.
    fn events(&self) -> &VecDeque<Self::Event>;
    /// Mutable access to the event deque.
    fn events_mut(&mut self) -> &mut VecDeque<Self::Event>;

    /// Process a single due event.
    fn process_event(&mut self, event: Self::Event);
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct TestEvent(u64, &'static str);

    impl Event for TestEvent {
        fn sample_time(&self) -> u64 {
            self.0
        }
    }

    #[derive(Default)]
    struct TestProcessor {
        events: VecDeque<TestEvent>,
        processed: Vec<&'static str>,
    }

    impl EventProcessor for TestProcessor {
        type Event = TestEvent;

        fn events(&self) -> &VecDeque<Self::Event> {
            &self.events
        }
        fn events_mut(&mut self) -> &mut VecDeque<Self::Event> {
            &mut self.events
        }
        fn process_event(&mut self, event: Self::Event) {
            self.processed.push(event.1);
        }
    }

    #[test]
    fn sorted_processing() {
        let mut processor = TestProcessor::default();
        processor.insert_event(TestEvent(20, "c"));
        processor.insert_event(TestEvent(10, "a"));
        processor.insert_event(TestEvent(10, "b"));
        assert_eq!(processor.time_until_next_event(5), 5);
        assert_eq!(processor.time_until_next_event(15), 0);

        processor.process_events(9);
        assert!(processor.processed.is_empty());
        processor.process_events(10);
        assert_eq!(processor.processed, vec!["a", "b"]);
        processor.process_events(100);
        assert_eq!(processor.processed, vec!["a", "b", "c"]);
        assert_eq!(processor.time_until_next_event(100), usize::MAX);
    }
}
