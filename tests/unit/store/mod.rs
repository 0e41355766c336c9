mod test_accounts;
