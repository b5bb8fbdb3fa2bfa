pub mod validator_trait;
