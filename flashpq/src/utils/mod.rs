/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

mod resource_pool;
pub use resource_pool::ResourcePool;
