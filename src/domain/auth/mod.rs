pub mod jwt;

pub use jwt::{Claims, TestTokenIssuer, TokenType, TEST_JWT_SECRET};
