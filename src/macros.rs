macro_rules! auto_increment {
    () => {{
        use std::sync::atomic::{AtomicU32, Ordering};

        static COUNTER: AtomicU32 = AtomicU32::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }};
}

pub(crate) use auto_increment;
