pub(crate) mod atomic_write;
