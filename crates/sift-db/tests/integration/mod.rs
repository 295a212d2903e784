mod broker_tests;
mod ledger_tests;
mod product_tests;
