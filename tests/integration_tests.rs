mod integration {
    mod cache_tests;
    mod persistence_tests;
    mod remote_tests;
    mod scan_tests;
    mod shares_tests;
}
