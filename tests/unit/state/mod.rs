mod test_keys;
mod test_memory_cache;
