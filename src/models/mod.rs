mod account;
mod company;
mod order;
mod trade;

pub use account::{Account, AccountDto, CreateAccountRequest, CreateAccountResponse, Holding, HoldingDto};
pub use company::{Company, CreateCompanyRequest};
pub use order::{
    CreateOrderRequest, FillDto, Order, OrderDto, OrderSide, OrderStatus, OrderType,
    SubmitOrderResponse,
};
pub use trade::{Trade, TradeDto};
